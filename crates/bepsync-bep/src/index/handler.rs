//! Async front of the index: runs store transactions on blocking worker
//! threads and publishes accepted records to downstream consumers.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use bepsync_core::{DeviceId, FileBlocks, FileInfo, FolderStats, IndexInfo};
use bepsync_store::{IndexRepository, IndexRepositoryExt, IndexTransaction};

use crate::error::{BepError, Result};
use crate::index::message::{self, IndexMessageResult};
use crate::messages::WireFileInfo;

/// Capacity of the event channel; slow subscribers lag past this.
const EVENT_CAPACITY: usize = 256;

/// Notifications for consumers of the index, such as a download scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEvent {
    /// A peer's index message produced new or changed records.
    RecordsAcquired {
        folder: String,
        peer: DeviceId,
        files: Vec<FileInfo>,
        index_info: IndexInfo,
        stats: FolderStats,
    },
}

/// Shared handle to the local index.
#[derive(Clone)]
pub struct IndexHandler {
    repository: Arc<dyn IndexRepository>,
    events: broadcast::Sender<IndexEvent>,
}

impl IndexHandler {
    pub fn new(repository: Arc<dyn IndexRepository>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { repository, events }
    }

    /// Subscribe to index events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.events.subscribe()
    }

    /// Run `f` in one store transaction on a blocking worker thread.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn IndexTransaction) -> Result<T> + Send + 'static,
    {
        let repository = Arc::clone(&self.repository);
        tokio::task::spawn_blocking(move || repository.run_in_transaction(f))
            .await
            .map_err(|e| BepError::Worker(e.to_string()))?
    }

    /// Merge an Index or IndexUpdate message received from `peer`.
    pub async fn handle_index_message_received(
        &self,
        folder: &str,
        files: Vec<WireFileInfo>,
        peer: DeviceId,
    ) -> Result<IndexMessageResult> {
        let owned_folder = folder.to_string();
        let result = self
            .transaction(move |tx| message::handle_index_message(tx, &owned_folder, &files, &peer))
            .await?;

        if result.updated_files.is_empty() {
            debug!(folder, peer = %peer, "index message changed nothing");
        } else {
            info!(
                folder,
                peer = %peer,
                updated = result.updated_files.len(),
                local_sequence = result.new_index_info.local_sequence,
                max_sequence = result.new_index_info.max_sequence,
                "acquired index records"
            );
            // No subscribers is fine.
            let _ = self.events.send(IndexEvent::RecordsAcquired {
                folder: folder.to_string(),
                peer,
                files: result.updated_files.clone(),
                index_info: result.new_index_info.clone(),
                stats: result.new_folder_stats.clone(),
            });
        }

        Ok(result)
    }

    /// Record what a peer announced about its own index of a folder.
    ///
    /// Creates the marker if missing. A new index epoch resets the local
    /// sequence; within an epoch the max sequence only grows.
    pub async fn update_index_info_from_cluster_config(
        &self,
        folder: &str,
        peer: DeviceId,
        index_id: u64,
        max_sequence: i64,
    ) -> Result<IndexInfo> {
        let folder = folder.to_string();
        self.transaction(move |tx| {
            let current = tx.find_index_info_by_device_and_folder(&peer, &folder)?;
            let updated = match current {
                Some(info) if info.index_id == index_id => IndexInfo {
                    max_sequence: info.max_sequence.max(max_sequence),
                    ..info
                },
                Some(info) => {
                    debug!(
                        folder = %folder,
                        peer = %peer,
                        old_index_id = info.index_id,
                        index_id,
                        "peer started a new index"
                    );
                    IndexInfo {
                        max_sequence,
                        ..IndexInfo::new(folder.clone(), peer, index_id)
                    }
                }
                None => {
                    let fresh = IndexInfo::new(folder.clone(), peer, index_id);
                    IndexInfo {
                        max_sequence: fresh.max_sequence.max(max_sequence),
                        ..fresh
                    }
                }
            };
            tx.update_index_info(&updated)?;
            Ok(updated)
        })
        .await
    }

    pub async fn index_info(&self, folder: &str, peer: DeviceId) -> Result<Option<IndexInfo>> {
        let folder = folder.to_string();
        self.transaction(move |tx| Ok(tx.find_index_info_by_device_and_folder(&peer, &folder)?))
            .await
    }

    /// Epoch and current sequence of the local index.
    pub async fn local_index_state(&self) -> Result<(u64, i64)> {
        self.transaction(|tx| Ok((tx.index_id()?, tx.current_sequence()?)))
            .await
    }

    pub async fn get_file_info(&self, folder: &str, path: &str) -> Result<Option<FileInfo>> {
        let (folder, path) = (folder.to_string(), path.to_string());
        self.transaction(move |tx| Ok(tx.find_file_info(&folder, &path)?))
            .await
    }

    pub async fn get_file_blocks(&self, folder: &str, path: &str) -> Result<Option<FileBlocks>> {
        let (folder, path) = (folder.to_string(), path.to_string());
        self.transaction(move |tx| Ok(tx.find_file_blocks(&folder, &path)?))
            .await
    }

    /// Live entries directly below `parent`, ordered by name.
    pub async fn list_directory(&self, folder: &str, parent: &str) -> Result<Vec<FileInfo>> {
        let (folder, parent) = (folder.to_string(), parent.to_string());
        self.transaction(move |tx| Ok(tx.find_not_deleted_files_by_folder_and_parent(&folder, &parent)?))
            .await
    }

    /// Stats of `folder`, zero-valued if nothing was recorded yet.
    pub async fn folder_stats(&self, folder: &str) -> Result<FolderStats> {
        let folder = folder.to_string();
        self.transaction(move |tx| {
            Ok(tx
                .find_folder_stats(&folder)?
                .unwrap_or_else(|| FolderStats::empty(folder.clone())))
        })
        .await
    }

    /// Forget everything received and start a new local index epoch.
    pub async fn clear_index(&self) -> Result<()> {
        self.transaction(|tx| Ok(tx.clear_index()?)).await?;
        info!("index cleared");
        Ok(())
    }
}
