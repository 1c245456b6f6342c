//! Error types for the store layer.

use messenger_model::ValidationError;
use messenger_types::{RecordId, RemoteId};
use rusqlite::ErrorCode;
use thiserror::Error;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A stored row could not be decoded.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The operation needs the store to be closed.
    #[error("store is in use: {0}")]
    InUse(String),
}

/// Why the store could not be opened. Terminal for the data stack.
///
/// Cloneable so that every caller queued on the same open receives it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreOpenError {
    /// The storage location cannot be reached or created.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The on-disk schema cannot be brought to the supported version.
    #[error("schema migration failed: {0}")]
    Migration(String),

    /// The file exists but is not a readable store.
    #[error("store is corrupt: {0}")]
    Corrupt(String),
}

impl From<StoreError> for StoreOpenError {
    fn from(err: StoreError) -> Self {
        if let StoreError::Database(rusqlite::Error::SqliteFailure(failure, _)) = &err {
            if matches!(failure.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt) {
                return Self::Corrupt(err.to_string());
            }
        }
        match err {
            StoreError::Migration(msg) => Self::Migration(msg),
            StoreError::InvalidData(msg) => Self::Corrupt(msg),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// Why a single mutation was rolled back.
///
/// Reported only to the submitter; the write context keeps serving.
#[derive(Debug, Error)]
pub enum MutationError {
    /// A touched record failed its schema check at save time.
    #[error("record {record} failed validation: {source}")]
    Validation {
        record: RecordId,
        #[source]
        source: ValidationError,
    },

    /// The mutation addressed a record that does not exist (or is deleted).
    #[error("record not found: {0}")]
    NotFound(RecordId),

    /// The remote identifier is already bound to another record.
    #[error("remote id {0} is already in use")]
    Conflict(RemoteId),

    /// The mutation itself declined to proceed.
    #[error("mutation rejected: {0}")]
    Rejected(String),

    /// Reading or writing within the transaction failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Committing the transaction failed.
    #[error("save failed: {0}")]
    Save(#[source] StoreError),

    /// The mutation panicked.
    #[error("mutation panicked: {0}")]
    Panicked(String),

    /// The write context no longer accepts work.
    #[error("write context is closed")]
    Closed,
}

impl From<rusqlite::Error> for MutationError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(err.into())
    }
}

impl MutationError {
    /// True for failures that a later attempt with the same input may not hit.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Save(_) | Self::Store(StoreError::Database(_)))
    }
}
