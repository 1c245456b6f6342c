//! Schema setup, versioned through `PRAGMA user_version`.

use crate::error::{StoreError, StoreResult};
use rusqlite::Connection;
use tracing::{debug, info};

/// The schema version this build reads and writes.
pub const SCHEMA_VERSION: i64 = 1;

/// Migration `n` brings a store from version `n` to `n + 1`.
const MIGRATIONS: &[&str] = &[
    // v0 -> v1
    "
    CREATE TABLE IF NOT EXISTS records (
        id TEXT PRIMARY KEY,
        remote_id TEXT NOT NULL UNIQUE,
        kind TEXT NOT NULL,
        fields TEXT NOT NULL,
        modified_wall INTEGER NOT NULL,
        modified_logical INTEGER NOT NULL,
        remote_wall INTEGER,
        remote_logical INTEGER,
        pending_push INTEGER NOT NULL DEFAULT 0,
        deleted INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_records_kind
        ON records(kind, deleted, modified_wall, modified_logical);

    CREATE INDEX IF NOT EXISTS idx_records_pending
        ON records(pending_push) WHERE pending_push = 1;
    ",
];

/// Reads the schema version stored in the database.
pub(crate) fn stored_version(conn: &Connection) -> StoreResult<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Brings the database up to [`SCHEMA_VERSION`] in a single transaction.
pub(crate) fn migrate(conn: &mut Connection) -> StoreResult<()> {
    let current = stored_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(StoreError::Migration(format!(
            "store schema version {current} is newer than supported version {SCHEMA_VERSION}"
        )));
    }
    if current < 0 {
        return Err(StoreError::Migration(format!("invalid store schema version {current}")));
    }
    if current == SCHEMA_VERSION {
        debug!(version = current, "store schema up to date");
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (step, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        tx.execute_batch(sql)
            .map_err(|e| StoreError::Migration(format!("step {step} -> {}: {e}", step + 1)))?;
    }
    tx.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
    tx.commit()?;

    info!(from = current, to = SCHEMA_VERSION, "store schema migrated");
    Ok(())
}
