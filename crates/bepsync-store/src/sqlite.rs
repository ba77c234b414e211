//! SQLite implementation of the index store.
//!
//! The persistent backend. One connection behind a mutex; every transaction
//! is a rusqlite `Transaction` that rolls back when dropped uncommitted.

use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace};

use bepsync_core::{
    BlockInfo, DeviceId, FileBlocks, FileInfo, FileKind, FileLastModifiedTime, FileVersion,
    FolderStats, IndexInfo,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{check_file_write, check_stats, IndexRepository, IndexTransaction};

/// Upper bound on bound parameters per batched lookup.
const LOOKUP_CHUNK: usize = 500;

const FILE_COLUMNS: &str = "folder, path, file_type, size, hash, invalid, symlink_target,
    last_modified_seconds, last_modified_nanos, last_modified_by, deleted,
    permissions, no_permissions, versions, sequence";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex, which also serializes transactions.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        migration::migrate(&mut conn)?;
        let created = conn.execute(
            "INSERT OR IGNORE INTO index_sequence (id, index_id, current_sequence)
             VALUES (0, ?1, 0)",
            params![new_index_id()],
        )?;
        if created > 0 {
            debug!("initialized new local index");
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl IndexRepository for SqliteStore {
    fn transact(&self, body: &mut dyn FnMut(&mut dyn IndexTransaction) -> Result<()>) -> Result<()> {
        let mut conn = self.conn.lock().map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                Some(format!("mutex poisoned: {}", e)),
            ))
        })?;

        let tx = conn.transaction()?;
        body(&mut SqliteTransaction { tx: &tx })?;
        tx.commit()?;
        trace!("sqlite transaction committed");
        Ok(())
    }
}

struct SqliteTransaction<'a> {
    tx: &'a Transaction<'a>,
}

/// Index ids are stored as INTEGER; keep them within i64.
fn new_index_id() -> i64 {
    (rand::random::<u64>() >> 1) as i64
}

fn encode_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_cbor<T: DeserializeOwned>(bytes: &[u8], column: usize) -> rusqlite::Result<T> {
    ciborium::from_reader(bytes)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Blob, Box::new(e)))
}

fn invalid_column(column: usize, name: &str, reason: impl Into<String>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        Type::Text,
        Box::new(StoreError::InvalidData(format!("{name}: {}", reason.into()))),
    )
}

fn row_to_file_info(row: &Row<'_>) -> rusqlite::Result<FileInfo> {
    let file_type: String = row.get("file_type")?;
    let kind = match file_type.as_str() {
        "file" => FileKind::File {
            size: row.get("size")?,
            hash: row.get("hash")?,
            invalid: row.get("invalid")?,
        },
        "directory" => FileKind::Directory,
        "symlink" => FileKind::Symlink {
            target: row.get::<_, Option<String>>("symlink_target")?.unwrap_or_default(),
        },
        other => return Err(invalid_column(2, "file_type", other)),
    };

    let versions_cbor: Vec<u8> = row.get("versions")?;
    let versions: Vec<(i64, i64)> = decode_cbor(&versions_cbor, 13)?;

    Ok(FileInfo::new(
        row.get::<_, String>("folder")?,
        row.get::<_, String>("path")?,
        kind,
    )
    .with_last_modified(FileLastModifiedTime::new(
        row.get("last_modified_seconds")?,
        row.get("last_modified_nanos")?,
    ))
    .with_modified_by(row.get::<_, i64>("last_modified_by")? as u64)
    .with_deleted(row.get("deleted")?)
    .with_versions(
        versions
            .into_iter()
            .map(|(id, value)| FileVersion::new(id as u64, value as u64))
            .collect(),
    )
    .with_permissions(row.get("permissions")?, row.get("no_permissions")?)
    .with_sequence(row.get("sequence")?))
}

fn row_to_index_info(row: &Row<'_>) -> rusqlite::Result<IndexInfo> {
    let device_hex: String = row.get("device_id")?;
    let device_id = DeviceId::from_hex(&device_hex)
        .map_err(|e| invalid_column(1, "device_id", e.to_string()))?;

    Ok(IndexInfo {
        folder: row.get("folder")?,
        device_id,
        index_id: row.get::<_, i64>("index_id")? as u64,
        local_sequence: row.get("local_sequence")?,
        max_sequence: row.get("max_sequence")?,
    })
}

fn row_to_folder_stats(row: &Row<'_>) -> rusqlite::Result<FolderStats> {
    Ok(FolderStats {
        folder: row.get("folder")?,
        file_count: row.get("file_count")?,
        dir_count: row.get("dir_count")?,
        size: row.get("size")?,
        last_update: row.get("last_update")?,
    })
}

impl IndexTransaction for SqliteTransaction<'_> {
    fn find_index_info_by_device_and_folder(
        &mut self,
        device: &DeviceId,
        folder: &str,
    ) -> Result<Option<IndexInfo>> {
        self.tx
            .query_row(
                "SELECT folder, device_id, index_id, local_sequence, max_sequence
                 FROM folder_index_info WHERE folder = ?1 AND device_id = ?2",
                params![folder, device.to_hex()],
                row_to_index_info,
            )
            .optional()
            .map_err(StoreError::from)
    }

    fn find_all_index_infos(&mut self) -> Result<Vec<IndexInfo>> {
        let mut stmt = self.tx.prepare_cached(
            "SELECT folder, device_id, index_id, local_sequence, max_sequence
             FROM folder_index_info ORDER BY folder, device_id",
        )?;
        let infos = stmt
            .query_map([], row_to_index_info)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(infos)
    }

    fn update_index_info(&mut self, info: &IndexInfo) -> Result<()> {
        self.tx.execute(
            "INSERT OR REPLACE INTO folder_index_info
                (folder, device_id, index_id, local_sequence, max_sequence)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                info.folder,
                info.device_id.to_hex(),
                info.index_id as i64,
                info.local_sequence,
                info.max_sequence,
            ],
        )?;
        Ok(())
    }

    fn find_file_info(&mut self, folder: &str, path: &str) -> Result<Option<FileInfo>> {
        self.tx
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM file_info WHERE folder = ?1 AND path = ?2"),
                params![folder, path],
                row_to_file_info,
            )
            .optional()
            .map_err(StoreError::from)
    }

    fn find_file_infos(
        &mut self,
        folder: &str,
        paths: &[String],
    ) -> Result<HashMap<String, FileInfo>> {
        let mut found = HashMap::with_capacity(paths.len());

        for chunk in paths.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT {FILE_COLUMNS} FROM file_info WHERE folder = ? AND path IN ({placeholders})"
            );
            let mut stmt = self.tx.prepare(&sql)?;
            let args = std::iter::once(folder).chain(chunk.iter().map(String::as_str));
            let rows = stmt.query_map(params_from_iter(args), row_to_file_info)?;
            for info in rows {
                let info = info?;
                found.insert(info.path().to_string(), info);
            }
        }

        Ok(found)
    }

    fn find_file_blocks(&mut self, folder: &str, path: &str) -> Result<Option<FileBlocks>> {
        let stored: Option<Vec<u8>> = self
            .tx
            .query_row(
                "SELECT blocks FROM file_blocks WHERE folder = ?1 AND path = ?2",
                params![folder, path],
                |row| row.get(0),
            )
            .optional()?;

        let Some(cbor) = stored else {
            return Ok(None);
        };
        let blocks: Vec<BlockInfo> = decode_cbor(&cbor, 0)?;
        Ok(Some(FileBlocks::new(folder, path, blocks)?))
    }

    fn find_not_deleted_files_by_folder_and_parent(
        &mut self,
        folder: &str,
        parent: &str,
    ) -> Result<Vec<FileInfo>> {
        let mut stmt = self.tx.prepare_cached(&format!(
            "SELECT {FILE_COLUMNS} FROM file_info
             WHERE folder = ?1 AND parent = ?2 AND path != '' AND deleted = 0
             ORDER BY file_name"
        ))?;
        let children = stmt
            .query_map(params![folder, parent], row_to_file_info)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(children)
    }

    fn update_file_info(&mut self, info: &FileInfo, blocks: Option<&FileBlocks>) -> Result<()> {
        check_file_write(info, blocks)?;

        let (size, hash, invalid, target) = match &info.kind {
            FileKind::File { hash, size, invalid } => (Some(*size), Some(hash.as_str()), *invalid, None),
            FileKind::Directory => (None, None, false, None),
            FileKind::Symlink { target } => (None, None, false, Some(target.as_str())),
        };
        let versions: Vec<(i64, i64)> = info
            .versions
            .iter()
            .map(|v| (v.id as i64, v.value as i64))
            .collect();

        self.tx.execute(
            "INSERT OR REPLACE INTO file_info (
                folder, path, file_name, parent, file_type, size, hash, invalid, symlink_target,
                last_modified_seconds, last_modified_nanos, last_modified_by, deleted,
                permissions, no_permissions, versions, sequence
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                info.folder,
                info.path(),
                info.file_name(),
                info.parent(),
                info.kind.type_name(),
                size,
                hash,
                invalid,
                target,
                info.last_modified.seconds,
                info.last_modified.nanos,
                info.last_modified_by as i64,
                info.deleted,
                info.permissions,
                info.no_permissions,
                encode_cbor(&versions)?,
                info.sequence,
            ],
        )?;

        match blocks {
            Some(blocks) => {
                self.tx.execute(
                    "INSERT OR REPLACE INTO file_blocks (folder, path, hash, size, blocks)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        blocks.folder(),
                        blocks.path(),
                        blocks.hash(),
                        blocks.size(),
                        encode_cbor(&blocks.blocks())?,
                    ],
                )?;
            }
            None => {
                self.tx.execute(
                    "DELETE FROM file_blocks WHERE folder = ?1 AND path = ?2",
                    params![info.folder, info.path()],
                )?;
            }
        }

        Ok(())
    }

    fn find_folder_stats(&mut self, folder: &str) -> Result<Option<FolderStats>> {
        self.tx
            .query_row(
                "SELECT folder, file_count, dir_count, size, last_update
                 FROM folder_stats WHERE folder = ?1",
                params![folder],
                row_to_folder_stats,
            )
            .optional()
            .map_err(StoreError::from)
    }

    fn find_all_folder_stats(&mut self) -> Result<Vec<FolderStats>> {
        let mut stmt = self.tx.prepare_cached(
            "SELECT folder, file_count, dir_count, size, last_update
             FROM folder_stats ORDER BY folder",
        )?;
        let stats = stmt
            .query_map([], row_to_folder_stats)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stats)
    }

    fn update_or_insert_folder_stats(
        &mut self,
        folder: &str,
        delta_file_count: i64,
        delta_dir_count: i64,
        delta_size: i64,
    ) -> Result<()> {
        let mut stats = self
            .find_folder_stats(folder)?
            .unwrap_or_else(|| FolderStats::empty(folder));
        stats.file_count += delta_file_count;
        stats.dir_count += delta_dir_count;
        stats.size += delta_size;
        check_stats(&stats)?;

        self.tx.execute(
            "INSERT INTO folder_stats (folder, file_count, dir_count, size, last_update)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(folder) DO UPDATE SET
                file_count = excluded.file_count,
                dir_count = excluded.dir_count,
                size = excluded.size",
            params![
                stats.folder,
                stats.file_count,
                stats.dir_count,
                stats.size,
                stats.last_update,
            ],
        )?;
        Ok(())
    }

    fn update_or_insert_folder_stats_last_update(
        &mut self,
        folder: &str,
        last_update: i64,
    ) -> Result<()> {
        self.tx.execute(
            "INSERT INTO folder_stats (folder, file_count, dir_count, size, last_update)
             VALUES (?1, 0, 0, 0, ?2)
             ON CONFLICT(folder) DO UPDATE SET
                last_update = MAX(last_update, excluded.last_update)",
            params![folder, last_update],
        )?;
        Ok(())
    }

    fn index_id(&mut self) -> Result<u64> {
        let id: i64 = self
            .tx
            .query_row("SELECT index_id FROM index_sequence WHERE id = 0", [], |row| {
                row.get(0)
            })?;
        Ok(id as u64)
    }

    fn current_sequence(&mut self) -> Result<i64> {
        Ok(self.tx.query_row(
            "SELECT current_sequence FROM index_sequence WHERE id = 0",
            [],
            |row| row.get(0),
        )?)
    }

    fn next_sequences(&mut self, count: usize) -> Result<Range<i64>> {
        let start = self.current_sequence()? + 1;
        let end = start + count as i64;
        self.tx.execute(
            "UPDATE index_sequence SET current_sequence = ?1 WHERE id = 0",
            params![end - 1],
        )?;
        Ok(start..end)
    }

    fn clear_index(&mut self) -> Result<()> {
        self.tx.execute_batch(
            "DELETE FROM file_info;
             DELETE FROM file_blocks;
             DELETE FROM folder_stats;
             DELETE FROM folder_index_info;",
        )?;
        self.tx.execute(
            "UPDATE index_sequence SET index_id = ?1, current_sequence = 0 WHERE id = 0",
            params![new_index_id()],
        )?;
        debug!("local index cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::IndexRepositoryExt;

    fn file_with_blocks(folder: &str, path: &str, block_size: i32) -> (FileInfo, FileBlocks) {
        let blocks = FileBlocks::new(
            folder,
            path,
            vec![
                BlockInfo::new(0, block_size, "01".repeat(32)),
                BlockInfo::new(block_size as i64, block_size, "02".repeat(32)),
            ],
        )
        .unwrap();
        let info = FileInfo::new(
            folder,
            path,
            FileKind::File {
                hash: blocks.hash().to_string(),
                size: blocks.size(),
                invalid: true,
            },
        )
        .with_last_modified(FileLastModifiedTime::new(1_700_000_000, 123))
        .with_modified_by(7)
        .with_versions(vec![FileVersion::new(7, 1), FileVersion::new(9, 3)])
        .with_permissions(0o644, false)
        .with_sequence(12);
        (info, blocks)
    }

    #[test]
    fn test_file_info_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let (info, blocks) = file_with_blocks("default", "docs/a.txt", 64);
        let link = FileInfo::new(
            "default",
            "docs/link",
            FileKind::Symlink {
                target: "a.txt".into(),
            },
        );

        store
            .run_in_transaction(|tx| -> Result<()> {
                tx.update_file_info_and_blocks(&[info.clone(), link.clone()], &[blocks.clone()])
            })
            .unwrap();

        let (found, found_blocks, found_link) = store
            .run_in_transaction(|tx| -> Result<_> {
                Ok((
                    tx.find_file_info("default", "docs/a.txt")?,
                    tx.find_file_blocks("default", "docs/a.txt")?,
                    tx.find_file_info("default", "docs/link")?,
                ))
            })
            .unwrap();
        assert_eq!(found, Some(info));
        assert_eq!(found_blocks, Some(blocks));
        assert_eq!(found_link, Some(link));
    }

    #[test]
    fn test_batched_lookup_returns_only_existing() {
        let store = SqliteStore::open_memory().unwrap();
        let (a, a_blocks) = file_with_blocks("default", "a", 10);
        let (b, b_blocks) = file_with_blocks("other", "b", 10);
        store
            .run_in_transaction(|tx| -> Result<()> {
                tx.update_file_info(&a, Some(&a_blocks))?;
                tx.update_file_info(&b, Some(&b_blocks))
            })
            .unwrap();

        let found = store
            .run_in_transaction(|tx| {
                tx.find_file_infos("default", &["a".to_string(), "b".to_string(), "c".to_string()])
            })
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("a"));
    }

    #[test]
    fn test_rollback_keeps_sequence() {
        let store = SqliteStore::open_memory().unwrap();
        let failed: Result<()> = store.run_in_transaction(|tx| {
            tx.next_sequences(5)?;
            Err(StoreError::InvalidData("abort".into()))
        });
        assert!(failed.is_err());

        let range = store
            .run_in_transaction(|tx| tx.next_sequences(2))
            .unwrap();
        assert_eq!(range, 1..3);
    }

    #[test]
    fn test_orphan_blocks_rejected() {
        let store = SqliteStore::open_memory().unwrap();
        let (info, _) = file_with_blocks("default", "a", 10);
        let (_, other_blocks) = file_with_blocks("default", "b", 10);

        let result: Result<()> = store
            .run_in_transaction(|tx| tx.update_file_info_and_blocks(&[info.clone()], &[other_blocks.clone()]));
        assert!(matches!(result, Err(StoreError::InvalidData(_))));
    }

    #[test]
    fn test_index_info_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let mut info = IndexInfo::new("default", DeviceId::from_bytes([3; 32]), u64::MAX >> 1);
        info.max_sequence = 40;

        store
            .run_in_transaction(|tx| tx.update_index_info(&info))
            .unwrap();
        let found = store
            .run_in_transaction(|tx| {
                tx.find_index_info_by_device_and_folder(&DeviceId::from_bytes([3; 32]), "default")
            })
            .unwrap();
        assert_eq!(found, Some(info));
    }

    #[test]
    fn test_stats_last_update_only_moves_forward() {
        let store = SqliteStore::open_memory().unwrap();
        store
            .run_in_transaction(|tx| -> Result<()> {
                tx.update_or_insert_folder_stats_last_update("default", 100)?;
                tx.update_or_insert_folder_stats("default", 1, 2, 30)?;
                tx.update_or_insert_folder_stats_last_update("default", 90)
            })
            .unwrap();

        let stats = store
            .run_in_transaction(|tx| tx.find_folder_stats("default"))
            .unwrap()
            .unwrap();
        assert_eq!(stats.last_update, 100);
        assert_eq!((stats.file_count, stats.dir_count, stats.size), (1, 2, 30));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");

        let index_id = {
            let store = SqliteStore::open(&path).unwrap();
            store
                .run_in_transaction(|tx| -> Result<_> {
                    tx.next_sequences(3)?;
                    tx.index_id()
                })
                .unwrap()
        };

        let store = SqliteStore::open(&path).unwrap();
        let (reopened_id, seq) = store
            .run_in_transaction(|tx| -> Result<_> { Ok((tx.index_id()?, tx.current_sequence()?)) })
            .unwrap();
        assert_eq!(reopened_id, index_id);
        assert_eq!(seq, 3);
    }
}
