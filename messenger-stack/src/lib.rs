//! Data stack lifecycle for the messenger.
//!
//! A [`DataStack`] owns the local store, the serialized write path and the
//! cloud sync bridge. Its [`ReadinessGate`] moves
//! `uninitialized -> initializing -> ready` (or `failed`) and broadcasts
//! readiness once. A [`SharedRegistry`] makes sure a process builds exactly
//! one stack, however many threads ask for it first.
//!
//! ```no_run
//! use messenger_stack::{DataStackConfig, SharedRegistry};
//! use messenger_sync::InMemoryContainer;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), messenger_stack::StackError> {
//! let config = DataStackConfig::at_path("/var/lib/messenger/store.sqlite");
//! let container = Arc::new(InMemoryContainer::new(config.container_identifier.clone()));
//! let registry = SharedRegistry::new(config, container, tokio::runtime::Handle::current());
//!
//! let stack = registry.shared_instance();
//! stack.wait_until_ready().await?;
//! let context = stack.background_context().ok_or(messenger_stack::StackError::NotReady)?;
//! # drop(context);
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
pub mod readiness;
mod registry;
mod stack;

pub use config::{DataStackConfig, DEFAULT_CONTAINER};
pub use error::{StackError, StackResult};
pub use readiness::{ReadinessGate, StackState};
pub use registry::SharedRegistry;
pub use stack::DataStack;
