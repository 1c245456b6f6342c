//! Remote change notifications.
//!
//! The cloud-sync transport delivers a [`RemoteChangeNotification`] whenever
//! remote data changes (push notification or periodic fetch). Each
//! notification carries one or more [`RemoteChange`]s. Notifications are
//! immutable, delivered at least once and possibly out of order; they are
//! consumed by the sync bridge and never persisted.

use crate::{NotificationId, RemoteId, Timestamp};
use serde::{Deserialize, Serialize};

/// The operation a remote change performs.
///
/// Record payloads are opaque JSON here; the record type string is resolved
/// against the model's schemas by the sync bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "snake_case")]
pub enum ChangeOp {
    /// The record was created or modified remotely. `fields` is the full
    /// remote snapshot of the record.
    Upsert {
        record_type: String,
        fields: serde_json::Value,
    },

    /// The record was deleted remotely.
    Delete { record_type: String },
}

impl ChangeOp {
    /// Returns the remote record type named by the operation.
    #[must_use]
    pub fn record_type(&self) -> &str {
        match self {
            Self::Upsert { record_type, .. } | Self::Delete { record_type } => record_type,
        }
    }

    #[must_use]
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete { .. })
    }
}

/// A change to a single remote record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChange {
    /// Correlation identifier of the changed record.
    pub remote_id: RemoteId,
    /// Remote-assigned version of this write.
    pub version: Timestamp,
    /// What happened to the record.
    pub op: ChangeOp,
}

impl RemoteChange {
    /// Creates an upsert change.
    #[must_use]
    pub fn upsert(
        remote_id: RemoteId,
        version: Timestamp,
        record_type: impl Into<String>,
        fields: serde_json::Value,
    ) -> Self {
        Self {
            remote_id,
            version,
            op: ChangeOp::Upsert {
                record_type: record_type.into(),
                fields,
            },
        }
    }

    /// Creates a delete change.
    #[must_use]
    pub fn delete(remote_id: RemoteId, version: Timestamp, record_type: impl Into<String>) -> Self {
        Self {
            remote_id,
            version,
            op: ChangeOp::Delete {
                record_type: record_type.into(),
            },
        }
    }
}

/// A batch of remote changes delivered by the cloud-sync transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChangeNotification {
    /// Identifier for diagnostics.
    pub id: NotificationId,
    /// The container the changes come from.
    pub container: String,
    /// Changes in transport order; order carries no meaning for the merge.
    pub changes: Vec<RemoteChange>,
}

impl RemoteChangeNotification {
    /// Creates a notification carrying the given changes.
    #[must_use]
    pub fn new(container: impl Into<String>, changes: Vec<RemoteChange>) -> Self {
        Self {
            id: NotificationId::new(),
            container: container.into(),
            changes,
        }
    }

    /// Creates a notification carrying one change.
    #[must_use]
    pub fn single(container: impl Into<String>, change: RemoteChange) -> Self {
        Self::new(container, vec![change])
    }

    /// Adds a change to this notification.
    #[must_use]
    pub fn with_change(mut self, change: RemoteChange) -> Self {
        self.changes.push(change);
        self
    }

    /// Returns the newest version carried by any change.
    #[must_use]
    pub fn newest_version(&self) -> Option<Timestamp> {
        self.changes.iter().map(|c| c.version).max()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
