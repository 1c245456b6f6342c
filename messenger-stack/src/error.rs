//! Error types for the data stack.

use messenger_store::StoreOpenError;
use thiserror::Error;

/// Result type for data stack operations.
pub type StackResult<T> = Result<T, StackError>;

/// Errors surfaced by the data stack and its registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    /// Startup failed; the stack is terminally `failed`.
    #[error("data stack failed: {0}")]
    Failed(#[from] StoreOpenError),

    /// The stack has not reached `ready`.
    #[error("data stack is not ready")]
    NotReady,

    /// The process-wide registry slot is already taken.
    #[error("a shared registry is already installed")]
    AlreadyInstalled,

    /// The process-wide registry slot is empty.
    #[error("no shared registry is installed")]
    NotInstalled,
}
