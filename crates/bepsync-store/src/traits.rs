//! Index store traits: the transactional interface consumed by the index
//! processors.
//!
//! Store operations are synchronous. Callers on an async runtime run whole
//! transactions on a blocking worker thread.

use std::collections::HashMap;
use std::ops::Range;

use bepsync_core::{DeviceId, FileBlocks, FileInfo, FolderStats, IndexInfo};

use crate::error::{Result, StoreError};

/// Operations available inside one store transaction.
///
/// Everything done through a transaction commits or rolls back as a unit,
/// including sequence allocations.
pub trait IndexTransaction {
    // ─────────────────────────────────────────────────────────────────────────
    // Index Progress
    // ─────────────────────────────────────────────────────────────────────────

    /// Progress marker for one peer's index of one folder.
    fn find_index_info_by_device_and_folder(
        &mut self,
        device: &DeviceId,
        folder: &str,
    ) -> Result<Option<IndexInfo>>;

    /// All progress markers.
    fn find_all_index_infos(&mut self) -> Result<Vec<IndexInfo>>;

    /// Insert or replace a progress marker.
    fn update_index_info(&mut self, info: &IndexInfo) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // File Records
    // ─────────────────────────────────────────────────────────────────────────

    fn find_file_info(&mut self, folder: &str, path: &str) -> Result<Option<FileInfo>>;

    /// Batched lookup keyed by path. Missing paths are absent from the map.
    fn find_file_infos(
        &mut self,
        folder: &str,
        paths: &[String],
    ) -> Result<HashMap<String, FileInfo>>;

    fn find_file_blocks(&mut self, folder: &str, path: &str) -> Result<Option<FileBlocks>>;

    /// Live children of a directory, ordered by file name.
    fn find_not_deleted_files_by_folder_and_parent(
        &mut self,
        folder: &str,
        parent: &str,
    ) -> Result<Vec<FileInfo>>;

    /// Insert or replace one record. Blocks are only valid for file records
    /// and must match them; `None` drops any stored block list for the path.
    fn update_file_info(&mut self, info: &FileInfo, blocks: Option<&FileBlocks>) -> Result<()>;

    /// Batched write. Each block list is paired with the record of the same
    /// path; a block list without a record is rejected.
    fn update_file_info_and_blocks(
        &mut self,
        infos: &[FileInfo],
        blocks: &[FileBlocks],
    ) -> Result<()> {
        let mut by_path: HashMap<&str, &FileBlocks> =
            blocks.iter().map(|b| (b.path(), b)).collect();
        if let Some(orphan) = blocks
            .iter()
            .find(|b| !infos.iter().any(|i| i.path() == b.path()))
        {
            return Err(StoreError::InvalidData(format!(
                "blocks for {} without a matching record",
                orphan.path()
            )));
        }

        for info in infos {
            self.update_file_info(info, by_path.remove(info.path()))?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Folder Stats
    // ─────────────────────────────────────────────────────────────────────────

    fn find_folder_stats(&mut self, folder: &str) -> Result<Option<FolderStats>>;

    fn find_all_folder_stats(&mut self) -> Result<Vec<FolderStats>>;

    /// Apply count and size deltas, creating the row from the deltas if it
    /// does not exist. Fails if any counter would become negative.
    fn update_or_insert_folder_stats(
        &mut self,
        folder: &str,
        delta_file_count: i64,
        delta_dir_count: i64,
        delta_size: i64,
    ) -> Result<()>;

    /// Move the folder's last-update timestamp forward. Older values are
    /// ignored.
    fn update_or_insert_folder_stats_last_update(
        &mut self,
        folder: &str,
        last_update: i64,
    ) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Sequencer
    // ─────────────────────────────────────────────────────────────────────────

    /// Epoch of the local index.
    fn index_id(&mut self) -> Result<u64>;

    /// The last allocated sequence number, 0 if none.
    fn current_sequence(&mut self) -> Result<i64>;

    /// Allocate one sequence number.
    fn next_sequence(&mut self) -> Result<i64> {
        Ok(self.next_sequences(1)?.start)
    }

    /// Allocate `count` contiguous sequence numbers.
    fn next_sequences(&mut self, count: usize) -> Result<Range<i64>>;

    /// Drop all records, stats and progress markers and start a new index
    /// epoch with the sequence reset.
    fn clear_index(&mut self) -> Result<()>;
}

/// A store that hands out transactions.
pub trait IndexRepository: Send + Sync {
    /// Run `body` inside one transaction. Commits when it returns `Ok`,
    /// rolls back otherwise.
    fn transact(&self, body: &mut dyn FnMut(&mut dyn IndexTransaction) -> Result<()>) -> Result<()>;
}

/// Extension trait with a typed transaction runner.
pub trait IndexRepositoryExt: IndexRepository {
    /// Run `f` inside one transaction, returning its value.
    ///
    /// Commits when `f` returns `Ok`. On `Err` the transaction is rolled back
    /// and `f`'s error is returned unchanged.
    fn run_in_transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut dyn IndexTransaction) -> std::result::Result<T, E>,
        E: From<StoreError>;
}

impl<R: IndexRepository + ?Sized> IndexRepositoryExt for R {
    fn run_in_transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut dyn IndexTransaction) -> std::result::Result<T, E>,
        E: From<StoreError>,
    {
        let mut f = Some(f);
        let mut outcome: Option<std::result::Result<T, E>> = None;

        let committed = self.transact(&mut |tx| {
            let f = f
                .take()
                .ok_or_else(|| StoreError::InvalidData("transaction body ran twice".into()))?;
            match f(tx) {
                Ok(value) => {
                    outcome = Some(Ok(value));
                    Ok(())
                }
                Err(e) => {
                    outcome = Some(Err(e));
                    Err(StoreError::RolledBack)
                }
            }
        });

        match (committed, outcome) {
            (_, Some(Err(e))) => Err(e),
            (Err(e), _) => Err(e.into()),
            (Ok(()), Some(Ok(value))) => Ok(value),
            (Ok(()), None) => Err(StoreError::InvalidData("transaction body never ran".into()).into()),
        }
    }
}

/// Validation shared by the backends before a record is written.
pub(crate) fn check_file_write(info: &FileInfo, blocks: Option<&FileBlocks>) -> Result<()> {
    if let Some(blocks) = blocks {
        blocks.check_against(info)?;
    }
    Ok(())
}

/// Validation shared by the backends before folder stats are stored.
pub(crate) fn check_stats(stats: &FolderStats) -> Result<()> {
    if stats.is_non_negative() {
        Ok(())
    } else {
        Err(StoreError::InvalidData(format!(
            "folder stats for {} would become negative: files={} dirs={} size={}",
            stats.folder, stats.file_count, stats.dir_count, stats.size
        )))
    }
}
