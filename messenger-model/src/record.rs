use crate::RecordKind;
use messenger_types::{RecordId, RemoteId, Timestamp};
use serde::{Deserialize, Serialize};

/// A persistent record (chatroom, user or message).
///
/// `fields` holds a JSON object whose shape is checked by the kind's
/// [`RecordSchema`](crate::RecordSchema). Deleted records stay in the store
/// as tombstones so that late, older remote writes cannot bring them back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub remote_id: RemoteId,
    pub kind: RecordKind,
    pub fields: serde_json::Value,
    /// Time of the last write to this record, local or merged.
    pub modified_at: Timestamp,
    /// Newest remote version folded into this record, if any.
    pub remote_version: Option<Timestamp>,
    /// A local edit has not been pushed to the cloud container yet.
    pub pending_push: bool,
    pub deleted: bool,
}

impl Record {
    /// Creates a live, locally edited record.
    #[must_use]
    pub fn new_local(
        kind: RecordKind,
        remote_id: RemoteId,
        fields: serde_json::Value,
        at: Timestamp,
    ) -> Self {
        Self {
            id: RecordId::new(),
            remote_id,
            kind,
            fields,
            modified_at: at,
            remote_version: None,
            pending_push: true,
            deleted: false,
        }
    }

    /// Creates a record that mirrors a remote write exactly.
    #[must_use]
    pub fn from_remote(
        kind: RecordKind,
        remote_id: RemoteId,
        fields: serde_json::Value,
        version: Timestamp,
    ) -> Self {
        Self {
            id: RecordId::new(),
            remote_id,
            kind,
            fields,
            modified_at: version,
            remote_version: Some(version),
            pending_push: false,
            deleted: false,
        }
    }

    /// True unless the record is a tombstone.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.deleted
    }

    /// True if a local edit is newer than the given remote version.
    #[must_use]
    pub fn has_local_edit_newer_than(&self, version: Timestamp) -> bool {
        self.pending_push && self.modified_at > version
    }

    /// Extract a string value from `fields` using a JSON pointer (e.g., "/title").
    pub fn get_str(&self, pointer: &str) -> Option<&str> {
        self.fields.pointer(pointer).and_then(|v| v.as_str())
    }

    /// Extract a boolean value from `fields` using a JSON pointer.
    pub fn get_bool(&self, pointer: &str) -> Option<bool> {
        self.fields.pointer(pointer).and_then(|v| v.as_bool())
    }

    /// Extract a numeric value from `fields` using a JSON pointer.
    pub fn get_number(&self, pointer: &str) -> Option<f64> {
        self.fields.pointer(pointer).and_then(|v| v.as_f64())
    }
}
