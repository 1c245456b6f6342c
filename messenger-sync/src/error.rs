//! Error types for the sync layer.

use messenger_model::{RecordKind, ValidationError};
use messenger_store::{MutationError, StoreError};
use messenger_types::{RemoteId, Timestamp};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Merged changes could not be committed. Nothing was applied; the
    /// notification can be delivered again.
    #[error("merge could not be saved: {0}")]
    Save(#[source] MutationError),

    /// The merge mutation failed for a reason other than the save.
    #[error("merge mutation failed: {0}")]
    Mutation(#[source] MutationError),

    /// Storage error outside a mutation.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The notification names a container this bridge does not serve.
    #[error("notification from container {actual:?}, expected {expected:?}")]
    ContainerMismatch { expected: String, actual: String },

    /// The cloud container reported a failure.
    #[error("cloud container error: {0}")]
    Container(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A background task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,
}

impl From<MutationError> for SyncError {
    fn from(err: MutationError) -> Self {
        match err {
            MutationError::Save(_) => Self::Save(err),
            MutationError::Closed => Self::ChannelClosed,
            other => Self::Mutation(other),
        }
    }
}

impl SyncError {
    /// True if delivering the same input again may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Save(_) | Self::Container(_) => true,
            Self::Mutation(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Why a single remote change was skipped.
///
/// Merge errors are per record: the change is rolled back alone and the
/// rest of the notification is still applied.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The change names a record type with no local counterpart.
    #[error("{remote_id}: unknown record type {record_type:?}")]
    UnknownRecordType { remote_id: RemoteId, record_type: String },

    /// The remote id is bound to a local record of another kind.
    #[error("{remote_id}: remote {remote} does not match local {local}")]
    KindMismatch {
        remote_id: RemoteId,
        local: RecordKind,
        remote: RecordKind,
    },

    /// The remote payload is not a field object.
    #[error("{remote_id}: malformed fields: {reason}")]
    MalformedFields { remote_id: RemoteId, reason: String },

    /// The change's version cannot be stored without breaking its ordering.
    #[error("{remote_id}: version {version} is out of range")]
    VersionOutOfRange { remote_id: RemoteId, version: Timestamp },

    /// The merged record does not satisfy its schema.
    #[error("{remote_id}: {source}")]
    Validation {
        remote_id: RemoteId,
        #[source]
        source: ValidationError,
    },

    /// Reading or writing the record failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
