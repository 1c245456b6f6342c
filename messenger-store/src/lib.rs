//! SQLite store engine and serialized write context for the messenger data stack.
//!
//! # Architecture
//!
//! - [`StoreEngine`] opens (or creates) the persistent store off the caller's
//!   thread, runs schema migrations, and hands out a shared [`StoreHandle`].
//!   Concurrent `open` calls share a single physical open.
//! - [`StoreHandle`] serves committed reads from any thread.
//! - [`WriteContext`] owns a dedicated worker thread. Every mutation runs on
//!   it, one at a time, inside its own transaction; the mutation's result is
//!   delivered through a [`Completion`] future.
//! - [`StoreTxn`] is what a mutation sees: record reads and writes, nested
//!   savepoints, and the context's hybrid logical clock. Saving validates the
//!   touched records and commits; anything else rolls back.

mod context;
mod engine;
mod error;
mod handle;
mod migrations;
mod records;
mod txn;

pub use context::{Completion, WriteContext};
pub use engine::{StoreEngine, StoreLocation};
pub use error::{MutationError, StoreError, StoreOpenError, StoreResult};
pub use handle::StoreHandle;
pub use migrations::SCHEMA_VERSION;
pub use records::MAX_WALL_TIME;
pub use txn::StoreTxn;
