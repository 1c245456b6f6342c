//! Cloud change merging for the messenger data stack.
//!
//! # Architecture
//!
//! - [`CloudContainer`] is the remote side: it streams
//!   [`RemoteChangeNotification`](messenger_types::RemoteChangeNotification)s
//!   and accepts pushed local edits. [`InMemoryContainer`] implements it in
//!   process.
//! - [`ChangeApplicator`] merges one remote change into a store transaction,
//!   last-writer-wins on the remote version.
//! - [`SyncBridge`] runs each notification as a single write-context
//!   mutation, one savepoint per change, and tracks [`SyncStatus`].
//!
//! Notifications may arrive more than once and in any order; merging the
//! same set of changes always converges on the same local state.

pub mod applicator;
mod bridge;
pub mod cloud;
mod error;
pub mod state;

pub use applicator::{merge_records, ChangeApplicator, MergeOutcome};
pub use bridge::{BridgeConfig, MergeFailure, MergeReport, SyncBridge};
pub use cloud::{CloudContainer, InMemoryContainer};
pub use error::{MergeError, SyncError, SyncResult};
pub use state::SyncStatus;
