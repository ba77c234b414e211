//! Database schema migrations for SQLite.
//!
//! Versioned migrations: each one transforms the schema from version N to
//! N+1 and is recorded in `schema_migrations`.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema. Idempotent.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Single-row sequencer and index epoch
        CREATE TABLE index_sequence (
            id INTEGER PRIMARY KEY CHECK (id = 0),
            index_id INTEGER NOT NULL,
            current_sequence INTEGER NOT NULL
        );

        -- Per (folder, peer) replication progress
        CREATE TABLE folder_index_info (
            folder TEXT NOT NULL,
            device_id TEXT NOT NULL,           -- hex
            index_id INTEGER NOT NULL,
            local_sequence INTEGER NOT NULL,
            max_sequence INTEGER NOT NULL,
            PRIMARY KEY (folder, device_id)
        );

        -- File, directory and symlink records
        CREATE TABLE file_info (
            folder TEXT NOT NULL,
            path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            parent TEXT NOT NULL,
            file_type TEXT NOT NULL,           -- file | directory | symlink
            size INTEGER,                      -- files only
            hash TEXT,                         -- files only
            invalid INTEGER NOT NULL DEFAULT 0,
            symlink_target TEXT,               -- symlinks only
            last_modified_seconds INTEGER NOT NULL,
            last_modified_nanos INTEGER NOT NULL,
            last_modified_by INTEGER NOT NULL,
            deleted INTEGER NOT NULL,
            permissions INTEGER NOT NULL,
            no_permissions INTEGER NOT NULL,
            versions BLOB NOT NULL,            -- CBOR array of (id, value)
            sequence INTEGER NOT NULL,
            PRIMARY KEY (folder, path),
            CHECK ((file_type = 'file') = (size IS NOT NULL AND hash IS NOT NULL))
        );

        -- Block lists of file records
        CREATE TABLE file_blocks (
            folder TEXT NOT NULL,
            path TEXT NOT NULL,
            hash TEXT NOT NULL,
            size INTEGER NOT NULL,
            blocks BLOB NOT NULL,              -- CBOR array of BlockInfo
            PRIMARY KEY (folder, path)
        );

        -- Per-folder aggregates
        CREATE TABLE folder_stats (
            folder TEXT PRIMARY KEY,
            file_count INTEGER NOT NULL CHECK (file_count >= 0),
            dir_count INTEGER NOT NULL CHECK (dir_count >= 0),
            size INTEGER NOT NULL CHECK (size >= 0),
            last_update INTEGER NOT NULL
        );

        CREATE INDEX idx_file_info_parent ON file_info(folder, parent);
        CREATE INDEX idx_file_info_sequence ON file_info(sequence);
        "#,
    )?;

    Ok(())
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
