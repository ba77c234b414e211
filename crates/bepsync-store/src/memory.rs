//! In-memory implementation of the index store.
//!
//! Same semantics as SQLite with no persistence. A transaction works on a
//! copy of the state and swaps it in on commit, so a failed body leaves the
//! store untouched.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::Mutex;

use bepsync_core::{DeviceId, FileBlocks, FileInfo, FolderStats, IndexInfo};
use tracing::trace;

use crate::error::{Result, StoreError};
use crate::traits::{check_file_write, check_stats, IndexRepository, IndexTransaction};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Transactions are serialized by
/// a single mutex.
pub struct MemoryStore {
    inner: Mutex<MemoryState>,
}

#[derive(Clone)]
struct MemoryState {
    index_id: u64,
    sequence: i64,

    /// Progress markers keyed by (folder, device).
    index_infos: BTreeMap<(String, DeviceId), IndexInfo>,

    /// Records keyed by (folder, path).
    files: BTreeMap<(String, String), FileInfo>,

    /// Block lists keyed by (folder, path).
    blocks: HashMap<(String, String), FileBlocks>,

    stats: BTreeMap<String, FolderStats>,
}

impl MemoryState {
    fn new() -> Self {
        Self {
            index_id: rand::random(),
            sequence: 0,
            index_infos: BTreeMap::new(),
            files: BTreeMap::new(),
            blocks: HashMap::new(),
            stats: BTreeMap::new(),
        }
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store with a random index epoch.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryState::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexRepository for MemoryStore {
    fn transact(&self, body: &mut dyn FnMut(&mut dyn IndexTransaction) -> Result<()>) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;

        let mut working = guard.clone();
        body(&mut MemoryTransaction { state: &mut working })?;
        *guard = working;
        trace!("memory transaction committed");
        Ok(())
    }
}

struct MemoryTransaction<'a> {
    state: &'a mut MemoryState,
}

fn key(folder: &str, path: &str) -> (String, String) {
    (folder.to_string(), path.to_string())
}

impl IndexTransaction for MemoryTransaction<'_> {
    fn find_index_info_by_device_and_folder(
        &mut self,
        device: &DeviceId,
        folder: &str,
    ) -> Result<Option<IndexInfo>> {
        Ok(self
            .state
            .index_infos
            .get(&(folder.to_string(), *device))
            .cloned())
    }

    fn find_all_index_infos(&mut self) -> Result<Vec<IndexInfo>> {
        Ok(self.state.index_infos.values().cloned().collect())
    }

    fn update_index_info(&mut self, info: &IndexInfo) -> Result<()> {
        self.state
            .index_infos
            .insert((info.folder.clone(), info.device_id), info.clone());
        Ok(())
    }

    fn find_file_info(&mut self, folder: &str, path: &str) -> Result<Option<FileInfo>> {
        Ok(self.state.files.get(&key(folder, path)).cloned())
    }

    fn find_file_infos(
        &mut self,
        folder: &str,
        paths: &[String],
    ) -> Result<HashMap<String, FileInfo>> {
        Ok(paths
            .iter()
            .filter_map(|p| {
                self.state
                    .files
                    .get(&key(folder, p))
                    .map(|info| (p.clone(), info.clone()))
            })
            .collect())
    }

    fn find_file_blocks(&mut self, folder: &str, path: &str) -> Result<Option<FileBlocks>> {
        Ok(self.state.blocks.get(&key(folder, path)).cloned())
    }

    fn find_not_deleted_files_by_folder_and_parent(
        &mut self,
        folder: &str,
        parent: &str,
    ) -> Result<Vec<FileInfo>> {
        let mut children: Vec<FileInfo> = self
            .state
            .files
            .values()
            .filter(|f| f.folder == folder && f.parent() == parent && !f.deleted)
            .filter(|f| !f.path().is_empty())
            .cloned()
            .collect();
        children.sort_by(|a, b| a.file_name().cmp(b.file_name()));
        Ok(children)
    }

    fn update_file_info(&mut self, info: &FileInfo, blocks: Option<&FileBlocks>) -> Result<()> {
        check_file_write(info, blocks)?;

        let k = key(&info.folder, info.path());
        match blocks {
            Some(b) => {
                self.state.blocks.insert(k.clone(), b.clone());
            }
            None => {
                self.state.blocks.remove(&k);
            }
        }
        self.state.files.insert(k, info.clone());
        Ok(())
    }

    fn find_folder_stats(&mut self, folder: &str) -> Result<Option<FolderStats>> {
        Ok(self.state.stats.get(folder).cloned())
    }

    fn find_all_folder_stats(&mut self) -> Result<Vec<FolderStats>> {
        Ok(self.state.stats.values().cloned().collect())
    }

    fn update_or_insert_folder_stats(
        &mut self,
        folder: &str,
        delta_file_count: i64,
        delta_dir_count: i64,
        delta_size: i64,
    ) -> Result<()> {
        let mut stats = self
            .state
            .stats
            .get(folder)
            .cloned()
            .unwrap_or_else(|| FolderStats::empty(folder));
        stats.file_count += delta_file_count;
        stats.dir_count += delta_dir_count;
        stats.size += delta_size;
        check_stats(&stats)?;

        self.state.stats.insert(folder.to_string(), stats);
        Ok(())
    }

    fn update_or_insert_folder_stats_last_update(
        &mut self,
        folder: &str,
        last_update: i64,
    ) -> Result<()> {
        let stats = self
            .state
            .stats
            .entry(folder.to_string())
            .or_insert_with(|| FolderStats::empty(folder));
        stats.last_update = stats.last_update.max(last_update);
        Ok(())
    }

    fn index_id(&mut self) -> Result<u64> {
        Ok(self.state.index_id)
    }

    fn current_sequence(&mut self) -> Result<i64> {
        Ok(self.state.sequence)
    }

    fn next_sequences(&mut self, count: usize) -> Result<Range<i64>> {
        let start = self.state.sequence + 1;
        let end = start + count as i64;
        self.state.sequence = end - 1;
        Ok(start..end)
    }

    fn clear_index(&mut self) -> Result<()> {
        *self.state = MemoryState::new();
        Ok(())
    }
}
