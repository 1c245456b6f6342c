//! Change applicator - merges one remote change into the local store.
//!
//! Conflicts are resolved last-writer-wins on the remote version:
//!
//! - no local record: the remote one is created (a delete leaves a tombstone)
//! - remote version older than the last one merged: stale, skipped
//! - same version as the last one merged: a delete beats an upsert, and
//!   between upserts the greater canonical JSON payload wins, so a
//!   redelivery (equal payload) is stale
//! - unpushed local edit newer than the remote write: local kept, re-pushed
//! - otherwise the remote write wins; equal timestamps go to the remote side
//!
//! Because tombstones keep their remote version, redelivered or reordered
//! changes converge on the same state.

use crate::error::MergeError;
use messenger_model::{MergeRule, Record, RecordKind};
use messenger_store::{StoreTxn, MAX_WALL_TIME};
use messenger_types::{ChangeOp, RemoteChange, RemoteId, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What applying a remote change did to the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// No local record existed; the remote one was created.
    Created,
    /// The remote write replaced (or was merged into) the local record.
    Updated,
    /// The remote delete was applied as a tombstone.
    Deleted,
    /// A newer unpushed local edit was kept and stays marked for push.
    KeptLocal,
    /// The change is not newer than what was already merged.
    Stale,
}

impl MergeOutcome {
    /// True if the local store was changed beyond bookkeeping.
    #[must_use]
    pub fn changed_data(self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::Deleted)
    }
}

/// Applies remote changes inside a mutation's transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeApplicator;

impl ChangeApplicator {
    pub fn new() -> Self {
        Self
    }

    /// Applies a single change.
    ///
    /// Run it inside [`StoreTxn::savepoint`] so that a failing change is
    /// rolled back without affecting the rest of the batch.
    pub fn apply(
        &self,
        txn: &mut StoreTxn<'_>,
        change: &RemoteChange,
    ) -> Result<MergeOutcome, MergeError> {
        let remote_id = &change.remote_id;
        let kind: RecordKind = change
            .op
            .record_type()
            .parse()
            .map_err(|_| MergeError::UnknownRecordType {
                remote_id: remote_id.clone(),
                record_type: change.op.record_type().to_string(),
            })?;

        if change.version.wall_time() > MAX_WALL_TIME {
            return Err(MergeError::VersionOutOfRange {
                remote_id: remote_id.clone(),
                version: change.version,
            });
        }

        txn.observe_remote(change.version);

        let outcome = match txn.load_by_remote(remote_id)? {
            None => self.apply_new(txn, kind, change)?,
            Some(local) => self.apply_existing(txn, kind, local, change)?,
        };
        debug!(%remote_id, %kind, version = %change.version, ?outcome, "remote change applied");
        Ok(outcome)
    }

    fn apply_new(
        &self,
        txn: &mut StoreTxn<'_>,
        kind: RecordKind,
        change: &RemoteChange,
    ) -> Result<MergeOutcome, MergeError> {
        let (record, outcome) = match &change.op {
            ChangeOp::Upsert { fields, .. } => {
                check_fields(&change.remote_id, fields)?;
                let record = Record::from_remote(
                    kind,
                    change.remote_id.clone(),
                    fields.clone(),
                    change.version,
                );
                (record, MergeOutcome::Created)
            }
            ChangeOp::Delete { .. } => (
                tombstone(kind, change.remote_id.clone(), change.version),
                MergeOutcome::Deleted,
            ),
        };
        self.write(txn, &record)?;
        Ok(outcome)
    }

    fn apply_existing(
        &self,
        txn: &mut StoreTxn<'_>,
        kind: RecordKind,
        local: Record,
        change: &RemoteChange,
    ) -> Result<MergeOutcome, MergeError> {
        if local.kind != kind {
            return Err(MergeError::KindMismatch {
                remote_id: change.remote_id.clone(),
                local: local.kind,
                remote: kind,
            });
        }

        match local.remote_version {
            Some(seen) if seen > change.version => return Ok(MergeOutcome::Stale),
            Some(seen) if seen == change.version && !wins_tie(&local, &change.op) => {
                return Ok(MergeOutcome::Stale);
            }
            _ => {}
        }

        if local.has_local_edit_newer_than(change.version) {
            let mut kept = local;
            kept.remote_version = Some(change.version);
            txn.put_record(&kept)?;
            return Ok(MergeOutcome::KeptLocal);
        }

        match &change.op {
            ChangeOp::Upsert { fields, .. } => {
                check_fields(&change.remote_id, fields)?;
                let rule = txn.schemas().merge_rule(kind);
                let merged = merge_records(&local, fields, change.version, rule);
                self.write(txn, &merged)?;
                Ok(MergeOutcome::Updated)
            }
            ChangeOp::Delete { .. } => {
                let mut gone = tombstone(kind, local.remote_id, change.version);
                gone.id = local.id;
                self.write(txn, &gone)?;
                Ok(MergeOutcome::Deleted)
            }
        }
    }

    fn write(&self, txn: &mut StoreTxn<'_>, record: &Record) -> Result<(), MergeError> {
        txn.schemas()
            .validate(record)
            .map_err(|source| MergeError::Validation {
                remote_id: record.remote_id.clone(),
                source,
            })?;
        txn.put_record(record)?;
        Ok(())
    }
}

/// Merges a winning remote snapshot into a local record.
///
/// With [`MergeRule::LwwPerField`], fields that only exist in an unpushed
/// local edit survive the overlay and the record stays marked for push.
/// Otherwise the remote snapshot replaces the local fields.
pub fn merge_records(
    local: &Record,
    remote_fields: &serde_json::Value,
    version: Timestamp,
    rule: MergeRule,
) -> Record {
    let keep_local_fields =
        rule == MergeRule::LwwPerField && local.pending_push && local.is_live();

    let fields = match (keep_local_fields, local.fields.as_object(), remote_fields.as_object()) {
        (true, Some(local_obj), Some(remote_obj)) => {
            let mut merged = local_obj.clone();
            for (key, value) in remote_obj {
                merged.insert(key.clone(), value.clone());
            }
            serde_json::Value::Object(merged)
        }
        _ => remote_fields.clone(),
    };
    let pending_push = keep_local_fields && fields != *remote_fields;

    Record {
        id: local.id,
        remote_id: local.remote_id.clone(),
        kind: local.kind,
        fields,
        modified_at: version,
        remote_version: Some(version),
        pending_push,
        deleted: false,
    }
}

/// Decides a tie between the stored remote write and an incoming one with
/// the same version. A record holding an unpushed local edit keeps it.
fn wins_tie(local: &Record, op: &ChangeOp) -> bool {
    if local.pending_push || local.deleted {
        return false;
    }
    match op {
        ChangeOp::Delete { .. } => true,
        // serde_json maps are ordered, so `to_string` is canonical.
        ChangeOp::Upsert { fields, .. } => fields.to_string() > local.fields.to_string(),
    }
}

fn tombstone(kind: RecordKind, remote_id: RemoteId, version: Timestamp) -> Record {
    let empty = serde_json::Value::Object(Default::default());
    let mut record = Record::from_remote(kind, remote_id, empty, version);
    record.deleted = true;
    record
}

fn check_fields(remote_id: &RemoteId, fields: &serde_json::Value) -> Result<(), MergeError> {
    if fields.is_object() {
        Ok(())
    } else {
        Err(MergeError::MalformedFields {
            remote_id: remote_id.clone(),
            reason: format!("expected an object, got {}", json_type(fields)),
        })
    }
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
