//! The transaction a mutation runs in.

use crate::error::{MutationError, StoreError, StoreResult};
use crate::records;
use messenger_model::{Record, RecordKind, SchemaRegistry};
use messenger_types::{RecordId, RemoteId, Timestamp};
use rusqlite::{Connection, Transaction};
use std::collections::BTreeSet;
use tracing::debug;

/// A mutation's view of the store.
///
/// Writes stay invisible to other readers until the write context saves the
/// transaction, which happens only if the mutation returns `Ok`. Local
/// writes are stamped from the context's hybrid logical clock and flagged
/// for push.
pub struct StoreTxn<'a> {
    tx: Transaction<'a>,
    clock: &'a mut Timestamp,
    schemas: &'a SchemaRegistry,
    touched: BTreeSet<RecordId>,
}

impl<'a> StoreTxn<'a> {
    pub(crate) fn begin(
        conn: &'a mut Connection,
        clock: &'a mut Timestamp,
        schemas: &'a SchemaRegistry,
    ) -> StoreResult<Self> {
        Ok(Self {
            tx: conn.transaction()?,
            clock,
            schemas,
            touched: BTreeSet::new(),
        })
    }

    /// Validates every touched live record, then commits.
    ///
    /// On any failure the transaction is dropped, which rolls it back.
    pub(crate) fn save(self) -> Result<(), MutationError> {
        for id in &self.touched {
            if let Some(record) = records::load(&self.tx, id)? {
                self.schemas
                    .validate(&record)
                    .map_err(|source| MutationError::Validation { record: *id, source })?;
            }
        }
        let touched = self.touched.len();
        self.tx.commit().map_err(|e| MutationError::Save(e.into()))?;
        debug!(touched, "mutation saved");
        Ok(())
    }

    /// The schemas in effect.
    pub fn schemas(&self) -> &SchemaRegistry {
        self.schemas
    }

    /// Advances the clock and returns a timestamp for a local write.
    pub fn now(&mut self) -> Timestamp {
        *self.clock = self.clock.tick();
        *self.clock
    }

    /// Current clock value, without advancing it.
    pub fn clock(&self) -> Timestamp {
        *self.clock
    }

    /// Moves the clock past a remote version so later local writes order after it.
    pub fn observe_remote(&mut self, version: Timestamp) {
        if version >= *self.clock {
            *self.clock = self.clock.receive(&version);
        }
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Fetches a live record by local id.
    pub fn get(&self, id: &RecordId) -> StoreResult<Option<Record>> {
        Ok(records::load(&self.tx, id)?.filter(Record::is_live))
    }

    /// Fetches a live record by correlation id.
    pub fn find_by_remote(&self, remote_id: &RemoteId) -> StoreResult<Option<Record>> {
        Ok(records::load_by_remote(&self.tx, remote_id)?.filter(Record::is_live))
    }

    /// Fetches a record by correlation id, tombstones included.
    pub fn load_by_remote(&self, remote_id: &RemoteId) -> StoreResult<Option<Record>> {
        records::load_by_remote(&self.tx, remote_id)
    }

    /// Live records of a kind.
    pub fn list(&self, kind: RecordKind) -> StoreResult<Vec<Record>> {
        records::list(&self.tx, kind)
    }

    // ── Local writes ─────────────────────────────────────────────

    /// Creates a record with a freshly generated remote id.
    pub fn insert(
        &mut self,
        kind: RecordKind,
        fields: serde_json::Value,
    ) -> Result<Record, MutationError> {
        self.insert_with_remote(kind, RemoteId::generate(), fields)
    }

    /// Creates a record under a caller-chosen remote id.
    pub fn insert_with_remote(
        &mut self,
        kind: RecordKind,
        remote_id: RemoteId,
        fields: serde_json::Value,
    ) -> Result<Record, MutationError> {
        if records::load_by_remote(&self.tx, &remote_id)?.is_some() {
            return Err(MutationError::Conflict(remote_id));
        }
        let at = self.now();
        let record = Record::new_local(kind, remote_id, fields, at);
        self.put_record(&record)?;
        Ok(record)
    }

    /// Replaces the fields of a live record.
    pub fn update(
        &mut self,
        id: &RecordId,
        fields: serde_json::Value,
    ) -> Result<Record, MutationError> {
        let mut record = self.get(id)?.ok_or(MutationError::NotFound(*id))?;
        record.fields = fields;
        self.stamp_local(&mut record)?;
        Ok(record)
    }

    /// Overwrites the given top-level fields of a live record, keeping the rest.
    pub fn patch(
        &mut self,
        id: &RecordId,
        changes: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Record, MutationError> {
        let mut record = self.get(id)?.ok_or(MutationError::NotFound(*id))?;
        match record.fields.as_object_mut() {
            Some(fields) => fields.extend(changes),
            None => record.fields = serde_json::Value::Object(changes),
        }
        self.stamp_local(&mut record)?;
        Ok(record)
    }

    /// Deletes a live record, leaving a tombstone to push.
    pub fn delete(&mut self, id: &RecordId) -> Result<(), MutationError> {
        let mut record = self.get(id)?.ok_or(MutationError::NotFound(*id))?;
        record.deleted = true;
        record.fields = serde_json::Value::Object(Default::default());
        self.stamp_local(&mut record)?;
        Ok(())
    }

    fn stamp_local(&mut self, record: &mut Record) -> StoreResult<()> {
        record.modified_at = self.now();
        record.pending_push = true;
        self.put_record(record)
    }

    // ── Sync bookkeeping ─────────────────────────────────────────

    /// Writes a record exactly as given. Used by the merge path, which
    /// computes timestamps and flags itself.
    pub fn put_record(&mut self, record: &Record) -> StoreResult<()> {
        records::write(&self.tx, record)?;
        self.touched.insert(record.id);
        Ok(())
    }

    /// Clears the push flag if the record has not been edited since `pushed_at`.
    ///
    /// Returns false when a newer local edit still needs pushing.
    pub fn clear_pending(&mut self, id: &RecordId, pushed_at: Timestamp) -> StoreResult<bool> {
        match records::load(&self.tx, id)? {
            Some(mut record) if record.pending_push && record.modified_at == pushed_at => {
                record.pending_push = false;
                self.put_record(&record)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Runs `f` in a nested scope that is rolled back alone if `f` fails.
    pub fn savepoint<R, E>(&mut self, f: impl FnOnce(&mut Self) -> Result<R, E>) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        self.tx
            .execute_batch("SAVEPOINT record_change")
            .map_err(|e| E::from(StoreError::from(e)))?;
        match f(self) {
            Ok(value) => {
                self.tx
                    .execute_batch("RELEASE record_change")
                    .map_err(|e| E::from(StoreError::from(e)))?;
                Ok(value)
            }
            Err(err) => {
                self.tx
                    .execute_batch("ROLLBACK TO record_change; RELEASE record_change")
                    .map_err(|e| E::from(StoreError::from(e)))?;
                Err(err)
            }
        }
    }
}
