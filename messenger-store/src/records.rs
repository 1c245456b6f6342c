//! Row mapping and SQL for the `records` table.
//!
//! Functions here take a plain `&Connection` so they serve both committed
//! reads through [`StoreHandle`](crate::StoreHandle) and reads/writes inside
//! a write-context transaction.

use crate::error::{StoreError, StoreResult};
use messenger_model::{Record, RecordKind};
use messenger_types::{RecordId, RemoteId, Timestamp};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Largest wall time a stored timestamp may carry. Wall times are kept in
/// signed SQLite integers so that `ORDER BY` sorts them correctly.
pub const MAX_WALL_TIME: u64 = i64::MAX as u64;

const COLUMNS: &str = "id, remote_id, kind, fields, modified_wall, modified_logical, \
                       remote_wall, remote_logical, pending_push, deleted";

/// A row as stored, before identifier and JSON decoding.
struct RawRecord {
    id: String,
    remote_id: String,
    kind: String,
    fields: String,
    modified_wall: i64,
    modified_logical: i64,
    remote_wall: Option<i64>,
    remote_logical: Option<i64>,
    pending_push: bool,
    deleted: bool,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            remote_id: row.get(1)?,
            kind: row.get(2)?,
            fields: row.get(3)?,
            modified_wall: row.get(4)?,
            modified_logical: row.get(5)?,
            remote_wall: row.get(6)?,
            remote_logical: row.get(7)?,
            pending_push: row.get(8)?,
            deleted: row.get(9)?,
        })
    }

    fn decode(self) -> StoreResult<Record> {
        let id: RecordId = self
            .id
            .parse()
            .map_err(|e| StoreError::InvalidData(format!("invalid record id {:?}: {e}", self.id)))?;
        let remote_id = RemoteId::new(self.remote_id)
            .map_err(|e| StoreError::InvalidData(format!("record {id}: {e}")))?;
        let kind: RecordKind = self
            .kind
            .parse()
            .map_err(|e| StoreError::InvalidData(format!("record {id}: {e}")))?;
        let fields = serde_json::from_str(&self.fields)?;
        let remote_version = match (self.remote_wall, self.remote_logical) {
            (Some(wall), Some(logical)) => Some(Timestamp::new(wall as u64, logical as u32)),
            _ => None,
        };

        Ok(Record {
            id,
            remote_id,
            kind,
            fields,
            modified_at: Timestamp::new(self.modified_wall as u64, self.modified_logical as u32),
            remote_version,
            pending_push: self.pending_push,
            deleted: self.deleted,
        })
    }
}

fn query_one(conn: &Connection, filter: &str, key: &str) -> StoreResult<Option<Record>> {
    let sql = format!("SELECT {COLUMNS} FROM records WHERE {filter} = ?1");
    conn.query_row(&sql, params![key], RawRecord::from_row)
        .optional()?
        .map(RawRecord::decode)
        .transpose()
}

fn query_many(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> StoreResult<Vec<Record>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, RawRecord::from_row)?;
    let mut result = Vec::new();
    for row in rows {
        result.push(row?.decode()?);
    }
    Ok(result)
}

/// Loads a record by local id, tombstones included.
pub(crate) fn load(conn: &Connection, id: &RecordId) -> StoreResult<Option<Record>> {
    query_one(conn, "id", &id.to_string())
}

/// Loads a record by correlation id, tombstones included.
pub(crate) fn load_by_remote(
    conn: &Connection,
    remote_id: &RemoteId,
) -> StoreResult<Option<Record>> {
    query_one(conn, "remote_id", remote_id.as_str())
}

/// Live records of a kind, oldest write first.
pub(crate) fn list(conn: &Connection, kind: RecordKind) -> StoreResult<Vec<Record>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM records WHERE kind = ?1 AND deleted = 0 \
         ORDER BY modified_wall, modified_logical, id"
    );
    query_many(conn, &sql, params![kind.as_str()])
}

/// Number of live records of a kind.
pub(crate) fn count(conn: &Connection, kind: RecordKind) -> StoreResult<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM records WHERE kind = ?1 AND deleted = 0",
        params![kind.as_str()],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}

/// Records (tombstones included) carrying an unpushed local edit.
pub(crate) fn pending_push(conn: &Connection) -> StoreResult<Vec<Record>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM records WHERE pending_push = 1 \
         ORDER BY modified_wall, modified_logical, id"
    );
    query_many(conn, &sql, [])
}

/// Newest write time recorded in the store.
pub(crate) fn latest_timestamp(conn: &Connection) -> StoreResult<Option<Timestamp>> {
    let row: Option<(i64, i64)> = conn
        .query_row(
            "SELECT modified_wall, modified_logical FROM records \
             ORDER BY modified_wall DESC, modified_logical DESC LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(row.map(|(wall, logical)| Timestamp::new(wall as u64, logical as u32)))
}

fn wall_column(record: &Record, ts: Timestamp) -> StoreResult<i64> {
    i64::try_from(ts.wall_time()).map_err(|_| {
        StoreError::InvalidData(format!(
            "record {}: wall time {} exceeds {MAX_WALL_TIME}",
            record.id,
            ts.wall_time()
        ))
    })
}

/// Inserts or replaces a record by local id.
pub(crate) fn write(conn: &Connection, record: &Record) -> StoreResult<()> {
    let fields = serde_json::to_string(&record.fields)?;
    let modified_wall = wall_column(record, record.modified_at)?;
    let remote_wall = record
        .remote_version
        .map(|v| wall_column(record, v))
        .transpose()?;
    conn.execute(
        "INSERT INTO records (id, remote_id, kind, fields, modified_wall, modified_logical,
                              remote_wall, remote_logical, pending_push, deleted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
             remote_id = excluded.remote_id,
             kind = excluded.kind,
             fields = excluded.fields,
             modified_wall = excluded.modified_wall,
             modified_logical = excluded.modified_logical,
             remote_wall = excluded.remote_wall,
             remote_logical = excluded.remote_logical,
             pending_push = excluded.pending_push,
             deleted = excluded.deleted",
        params![
            record.id.to_string(),
            record.remote_id.as_str(),
            record.kind.as_str(),
            fields,
            modified_wall,
            i64::from(record.modified_at.logical()),
            remote_wall,
            record.remote_version.map(|v| i64::from(v.logical())),
            record.pending_push,
            record.deleted,
        ],
    )?;
    Ok(())
}
