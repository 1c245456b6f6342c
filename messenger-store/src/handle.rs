//! Shared handle to an open store.

use crate::engine::{self, StoreLocation};
use crate::error::StoreResult;
use crate::{migrations, records};
use messenger_model::{Record, RecordKind};
use messenger_types::{RecordId, RemoteId, Timestamp};
use rusqlite::Connection;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A handle to an open store. Cheap to clone; all clones share one connection.
///
/// Reads through the handle only ever observe committed state: the write
/// context holds the connection for the whole of each mutation, so a
/// transaction is either fully visible or not at all.
///
/// Do not read through a `StoreHandle` from inside a mutation; use the
/// mutation's [`StoreTxn`](crate::StoreTxn) instead.
#[derive(Clone)]
pub struct StoreHandle {
    conn: Arc<Mutex<Connection>>,
    location: StoreLocation,
}

impl StoreHandle {
    pub(crate) fn from_connection(conn: Connection, location: StoreLocation) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            location,
        }
    }

    /// Opens an in-memory store synchronously (for tests and tools).
    pub fn open_in_memory() -> StoreResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        engine::configure(&conn)?;
        migrations::migrate(&mut conn)?;
        Ok(Self::from_connection(conn, StoreLocation::InMemory))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Where this store lives.
    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// True if both handles refer to the same open store.
    pub fn same_store(&self, other: &StoreHandle) -> bool {
        Arc::ptr_eq(&self.conn, &other.conn)
    }

    /// Schema version of the open store.
    pub fn schema_version(&self) -> StoreResult<i64> {
        migrations::stored_version(&self.lock())
    }

    /// Fetches a live record by local id.
    pub fn get(&self, id: &RecordId) -> StoreResult<Option<Record>> {
        Ok(records::load(&self.lock(), id)?.filter(Record::is_live))
    }

    /// Fetches a live record by correlation id.
    pub fn find_by_remote(&self, remote_id: &RemoteId) -> StoreResult<Option<Record>> {
        Ok(records::load_by_remote(&self.lock(), remote_id)?.filter(Record::is_live))
    }

    /// Fetches a record by correlation id, tombstones included.
    pub fn load_by_remote(&self, remote_id: &RemoteId) -> StoreResult<Option<Record>> {
        records::load_by_remote(&self.lock(), remote_id)
    }

    /// Live records of a kind, oldest write first.
    pub fn list(&self, kind: RecordKind) -> StoreResult<Vec<Record>> {
        records::list(&self.lock(), kind)
    }

    /// Number of live records of a kind.
    pub fn count(&self, kind: RecordKind) -> StoreResult<usize> {
        records::count(&self.lock(), kind)
    }

    /// Records whose local edits have not been pushed yet, deletions included.
    pub fn pending_push(&self) -> StoreResult<Vec<Record>> {
        records::pending_push(&self.lock())
    }

    /// Newest write time in the store, if it holds any record.
    pub fn latest_timestamp(&self) -> StoreResult<Option<Timestamp>> {
        records::latest_timestamp(&self.lock())
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}
