//! Core type definitions for the messenger data stack.
//!
//! This crate defines the plain types shared by the store, the sync bridge
//! and the coordinator:
//! - Local record identifiers (UUID v7) and remote correlation identifiers
//! - Hybrid Logical Clock timestamps used for local edits and remote versions
//! - Remote change notifications delivered by the cloud-sync transport
//!
//! Record field shapes belong to `messenger-model`, not here.

mod change;
mod ids;
mod timestamp;

pub use change::{ChangeOp, RemoteChange, RemoteChangeNotification};
pub use ids::{NotificationId, RecordId, RemoteId};
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid remote identifier: {0:?}")]
    InvalidRemoteId(String),
}
