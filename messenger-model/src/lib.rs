//! Record model for the messenger data stack.
//!
//! Defines the types that the store, the write context and the sync bridge
//! agree on:
//! - [`Record`]: a persistent chatroom, user or message with its local and
//!   remote identities and sync bookkeeping
//! - [`RecordKind`]: the closed set of record types the store accepts
//! - [`RecordSchema`]: required fields and the [`MergeRule`] for a kind
//! - [`SchemaRegistry`]: the schemas in effect for a data stack
//!
//! Field contents are plain JSON objects. Rich-text message bodies are
//! opaque strings here; their encoding is owned by the UI layer.

mod kind;
mod record;
mod schema;

pub use kind::{RecordKind, UnknownRecordKind};
pub use record::Record;
pub use schema::{MergeRule, RecordSchema, SchemaRegistry, ValidationError};
