//! Processing of one incoming Index or IndexUpdate message inside a single
//! store transaction.

use tracing::debug;

use bepsync_core::{DeviceId, FileInfo, FolderStats, IndexInfo};
use bepsync_store::IndexTransaction;

use crate::error::{BepError, Result};
use crate::index::collector::FolderStatsUpdateCollector;
use crate::index::element;
use crate::messages::WireFileInfo;

/// Outcome of processing one index message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMessageResult {
    pub new_index_info: IndexInfo,
    /// Records actually written, sequence-stamped.
    pub updated_files: Vec<FileInfo>,
    /// Folder aggregates after the update.
    pub new_folder_stats: FolderStats,
}

/// Merge one index message from `peer` for `folder`.
///
/// Fails with [`BepError::IndexInfoNotFound`] before any write when the peer
/// has no progress marker for the folder.
pub fn handle_index_message(
    tx: &mut dyn IndexTransaction,
    folder: &str,
    files: &[WireFileInfo],
    peer: &DeviceId,
) -> Result<IndexMessageResult> {
    let old_index_info = tx
        .find_index_info_by_device_and_folder(peer, folder)?
        .ok_or_else(|| BepError::IndexInfoNotFound {
            device: *peer,
            folder: folder.to_string(),
        })?;

    debug!(folder, peer = %peer, records = files.len(), "processing index records");

    let paths: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
    let old_records = tx.find_file_infos(folder, &paths)?;
    let mut collector = FolderStatsUpdateCollector::new(folder);

    let updated_files = element::push_records(tx, folder, files, &old_records, &mut collector)?;

    let new_index_info = match files.iter().map(|f| f.sequence).max() {
        None => old_index_info,
        Some(max_sequence) => {
            handle_folder_stats_update(tx, &collector)?;
            advance_local_sequence(tx, old_index_info, max_sequence)?
        }
    };

    let new_folder_stats = tx
        .find_folder_stats(folder)?
        .unwrap_or_else(|| FolderStats::empty(folder));

    Ok(IndexMessageResult {
        new_index_info,
        updated_files,
        new_folder_stats,
    })
}

/// Flush a collector to the store: the deltas first, then the last-update
/// timestamp. Does nothing for an empty collector.
pub fn handle_folder_stats_update(
    tx: &mut dyn IndexTransaction,
    collector: &FolderStatsUpdateCollector,
) -> Result<()> {
    if collector.is_empty() {
        return Ok(());
    }

    tx.update_or_insert_folder_stats(
        &collector.folder,
        collector.delta_file_count,
        collector.delta_dir_count,
        collector.delta_size,
    )?;

    if let Some(last_modified) = collector.last_modified {
        tx.update_or_insert_folder_stats_last_update(
            &collector.folder,
            last_modified.rounded_millis(),
        )?;
    }

    Ok(())
}

/// Record that the peer's records up to `sequence` have been seen.
fn advance_local_sequence(
    tx: &mut dyn IndexTransaction,
    index_info: IndexInfo,
    sequence: i64,
) -> Result<IndexInfo> {
    if sequence <= index_info.local_sequence {
        return Ok(index_info);
    }

    let updated = IndexInfo {
        local_sequence: sequence,
        ..index_info
    };
    tx.update_index_info(&updated)?;
    Ok(updated)
}
