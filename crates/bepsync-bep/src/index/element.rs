//! Merging of wire file records into the local index.
//!
//! Conflict resolution is last-writer-wins on the modification time. Version
//! vectors are carried into the store but not consulted.

use std::collections::{HashMap, HashSet};

use tracing::{trace, warn};

use bepsync_core::{
    BlockInfo, FileBlocks, FileInfo, FileKind, FileLastModifiedTime, FileVersion,
};
use bepsync_store::IndexTransaction;

use crate::error::Result;
use crate::index::collector::FolderStatsUpdateCollector;
use crate::messages::{FileInfoType, WireFileInfo};

/// Convert a wire record into a model record and, for files, its block list.
///
/// Returns `None` for records that cannot be represented: unsupported type
/// tags, missing version vectors and live files whose announced size does not
/// match their blocks.
pub fn prepare_update(
    folder: &str,
    wire: &WireFileInfo,
    sequence: i64,
) -> Option<(FileInfo, Option<FileBlocks>)> {
    if wire.version.is_empty() {
        warn!(folder, path = %wire.name, "record without version entries, discarding");
        return None;
    }

    let (kind, blocks) = match wire.file_info_type() {
        Some(FileInfoType::File) => {
            let block_list = wire
                .blocks
                .iter()
                .map(|b| BlockInfo::new(b.offset, b.size, hex::encode(&b.hash)))
                .collect();
            let blocks = match FileBlocks::new(folder, &wire.name, block_list) {
                Ok(blocks) => blocks,
                Err(e) => {
                    warn!(folder, path = %wire.name, error = %e, "unreadable block list, discarding");
                    return None;
                }
            };

            if wire.deleted {
                let kind = FileKind::File {
                    hash: blocks.hash().to_string(),
                    size: wire.size,
                    invalid: true,
                };
                (kind, None)
            } else {
                if blocks.size() != wire.size {
                    warn!(
                        folder,
                        path = %wire.name,
                        announced = wire.size,
                        blocks = blocks.size(),
                        "file size does not match its blocks, discarding"
                    );
                    return None;
                }
                let kind = FileKind::File {
                    hash: blocks.hash().to_string(),
                    size: blocks.size(),
                    invalid: true,
                };
                (kind, Some(blocks))
            }
        }
        Some(FileInfoType::Directory) => (FileKind::Directory, None),
        Some(FileInfoType::Symlink) => (
            FileKind::Symlink {
                target: wire.symlink_target.clone(),
            },
            None,
        ),
        Some(t @ (FileInfoType::SymlinkFile | FileInfoType::SymlinkDirectory)) => {
            warn!(folder, path = %wire.name, file_type = ?t, "unsupported file type, discarding");
            return None;
        }
        None => {
            warn!(folder, path = %wire.name, file_type = wire.file_type, "unknown file type, discarding");
            return None;
        }
    };

    let info = FileInfo::new(folder, wire.name.clone(), kind)
        .with_last_modified(FileLastModifiedTime::new(wire.modified_s, wire.modified_ns))
        .with_modified_by(wire.modified_by)
        .with_deleted(wire.deleted)
        .with_versions(
            wire.version
                .iter()
                .map(|c| FileVersion::new(c.id, c.value))
                .collect(),
        )
        .with_permissions(wire.permissions, wire.no_permissions)
        .with_sequence(sequence);

    Some((info, blocks))
}

/// Whether `new` supersedes `old`. Ties favor the incoming record.
pub fn should_update_record(old: Option<&FileInfo>, new: &FileInfo) -> bool {
    match old {
        None => true,
        Some(old) => new.last_modified >= old.last_modified,
    }
}

/// Keep one record per path: the one with the greatest wire sequence. Among
/// equal sequences the later occurrence wins. Output is ordered by sequence.
fn dedup_by_path(updates: &[WireFileInfo]) -> Vec<&WireFileInfo> {
    let mut sorted: Vec<&WireFileInfo> = updates.iter().collect();
    sorted.sort_by_key(|u| u.sequence);

    let mut seen = HashSet::new();
    let mut survivors: Vec<&WireFileInfo> = sorted
        .into_iter()
        .rev()
        .filter(|u| seen.insert(u.name.as_str()))
        .collect();
    survivors.reverse();
    survivors
}

/// Merge a batch of wire records.
///
/// Accepted records get a contiguous range of fresh local sequence numbers in
/// processing order and are written in one batch. Returns the stored records.
pub fn push_records(
    tx: &mut dyn IndexTransaction,
    folder: &str,
    updates: &[WireFileInfo],
    old_records: &HashMap<String, FileInfo>,
    collector: &mut FolderStatsUpdateCollector,
) -> Result<Vec<FileInfo>> {
    let accepted: Vec<(FileInfo, Option<FileBlocks>)> = dedup_by_path(updates)
        .into_iter()
        .filter_map(|wire| prepare_update(folder, wire, 0))
        .filter(|(info, _)| {
            let keep = should_update_record(old_records.get(info.path()), info);
            if !keep {
                trace!(folder, path = info.path(), "discarding record older than local one");
            }
            keep
        })
        .collect();

    let sequences = tx.next_sequences(accepted.len())?;
    let (infos, blocks): (Vec<FileInfo>, Vec<Option<FileBlocks>>) = accepted
        .into_iter()
        .zip(sequences)
        .map(|((info, blocks), sequence)| (info.with_sequence(sequence), blocks))
        .unzip();
    let blocks: Vec<FileBlocks> = blocks.into_iter().flatten().collect();

    tx.update_file_info_and_blocks(&infos, &blocks)?;

    for info in &infos {
        update_folder_stats_collector(old_records.get(info.path()), info, collector);
    }

    Ok(infos)
}

/// Merge one wire record. Allocates exactly one sequence number, whether or
/// not the record is accepted.
pub fn push_record(
    tx: &mut dyn IndexTransaction,
    folder: &str,
    wire: &WireFileInfo,
    collector: &mut FolderStatsUpdateCollector,
    old_record: Option<&FileInfo>,
) -> Result<Option<FileInfo>> {
    let sequence = tx.next_sequence()?;
    let Some((info, blocks)) = prepare_update(folder, wire, sequence) else {
        return Ok(None);
    };

    if !should_update_record(old_record, &info) {
        trace!(folder, path = info.path(), "discarding record older than local one");
        return Ok(None);
    }

    trace!(folder, path = info.path(), sequence, "storing record");
    tx.update_file_info(&info, blocks.as_ref())?;
    update_folder_stats_collector(old_record, &info, collector);
    Ok(Some(info))
}

/// Fold the change from `old` to `new` into the collector.
///
/// Sizes count for live files only; counts for live files and directories.
/// Symlinks are not counted. The collector's timestamp is overwritten with
/// `new`'s unconditionally.
pub fn update_folder_stats_collector(
    old: Option<&FileInfo>,
    new: &FileInfo,
    collector: &mut FolderStatsUpdateCollector,
) {
    let live_old = old.filter(|o| !o.deleted);

    if let Some(old) = live_old {
        match &old.kind {
            FileKind::File { size, .. } => {
                collector.delta_size -= size;
                collector.delta_file_count -= 1;
            }
            FileKind::Directory => collector.delta_dir_count -= 1,
            FileKind::Symlink { .. } => {}
        }
    }

    if !new.deleted {
        match &new.kind {
            FileKind::File { size, .. } => {
                collector.delta_size += size;
                collector.delta_file_count += 1;
            }
            FileKind::Directory => collector.delta_dir_count += 1,
            FileKind::Symlink { .. } => {}
        }
    }

    collector.last_modified = Some(new.last_modified);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Counter, WireBlockInfo};
    use bepsync_store::{IndexRepositoryExt, MemoryStore};

    fn wire_file(name: &str, size: i32, modified_s: i64, sequence: i64) -> WireFileInfo {
        WireFileInfo {
            name: name.to_string(),
            file_type: FileInfoType::File.to_i32(),
            size: size as i64,
            modified_s,
            modified_by: 1,
            version: vec![Counter { id: 1, value: sequence as u64 }],
            sequence,
            blocks: vec![WireBlockInfo {
                offset: 0,
                size,
                hash: vec![sequence as u8; 32],
                weak_hash: 0,
            }],
            ..Default::default()
        }
    }

    fn wire_dir(name: &str, sequence: i64) -> WireFileInfo {
        WireFileInfo {
            name: name.to_string(),
            file_type: FileInfoType::Directory.to_i32(),
            version: vec![Counter { id: 1, value: 1 }],
            sequence,
            ..Default::default()
        }
    }

    fn push_all(
        store: &MemoryStore,
        updates: Vec<WireFileInfo>,
    ) -> (Vec<FileInfo>, FolderStatsUpdateCollector) {
        store
            .run_in_transaction(|tx| -> Result<_> {
                let paths: Vec<String> = updates.iter().map(|u| u.name.clone()).collect();
                let old = tx.find_file_infos("default", &paths)?;
                let mut collector = FolderStatsUpdateCollector::new("default");
                let stored = push_records(tx, "default", &updates, &old, &mut collector)?;
                Ok((stored, collector))
            })
            .unwrap()
    }

    #[test]
    fn test_prepare_file_derives_hash_from_blocks() {
        let (info, blocks) = prepare_update("default", &wire_file("a/b.txt", 64, 10, 3), 5).unwrap();
        let blocks = blocks.unwrap();
        assert_eq!(info.hash(), Some(blocks.hash()));
        assert_eq!(info.size(), Some(64));
        assert_eq!(info.sequence, 5);
        assert_eq!(info.parent(), "a");
        assert!(matches!(info.kind, FileKind::File { invalid: true, .. }));
    }

    #[test]
    fn test_prepare_discards_unsupported_types() {
        let mut wire = wire_dir("x", 1);
        wire.file_type = FileInfoType::SymlinkFile.to_i32();
        assert!(prepare_update("default", &wire, 1).is_none());
        wire.file_type = 99;
        assert!(prepare_update("default", &wire, 1).is_none());
    }

    #[test]
    fn test_prepare_discards_size_mismatch() {
        let mut wire = wire_file("a", 64, 10, 1);
        wire.size = 65;
        assert!(prepare_update("default", &wire, 1).is_none());
    }

    #[test]
    fn test_prepare_symlink() {
        let wire = WireFileInfo {
            name: "link".into(),
            file_type: FileInfoType::Symlink.to_i32(),
            symlink_target: "target".into(),
            version: vec![Counter { id: 1, value: 1 }],
            sequence: 42,
            ..Default::default()
        };
        let (info, blocks) = prepare_update("default", &wire, 7).unwrap();
        assert!(blocks.is_none());
        assert_eq!(info.sequence, 7);
        assert_eq!(
            info.kind,
            FileKind::Symlink {
                target: "target".into()
            }
        );
    }

    #[test]
    fn test_should_update_record_ties_favor_incoming() {
        let old = FileInfo::new("f", "p", FileKind::Directory)
            .with_last_modified(FileLastModifiedTime::new(10, 5));
        let same = old.clone();
        let older = old
            .clone()
            .with_last_modified(FileLastModifiedTime::new(10, 4));
        assert!(should_update_record(None, &old));
        assert!(should_update_record(Some(&old), &same));
        assert!(!should_update_record(Some(&old), &older));
    }

    #[test]
    fn test_batch_keeps_highest_sequence_per_path() {
        let store = MemoryStore::new();
        let (stored, _) = push_all(
            &store,
            vec![
                wire_file("a", 10, 100, 5),
                wire_file("a", 20, 100, 9),
                wire_file("a", 30, 100, 7),
            ],
        );
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].size(), Some(20));

        let found = store
            .run_in_transaction(|tx| tx.find_file_info("default", "a"))
            .unwrap()
            .unwrap();
        assert_eq!(found.size(), Some(20));
    }

    #[test]
    fn test_batch_assigns_contiguous_sequences() {
        let store = MemoryStore::new();
        store
            .run_in_transaction(|tx| tx.next_sequences(10).map(|_| ()))
            .unwrap();

        let (stored, _) = push_all(
            &store,
            vec![wire_dir("d", 1), wire_file("d/a", 5, 1, 2), wire_file("d/b", 5, 1, 3)],
        );
        let sequences: Vec<i64> = stored.iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![11, 12, 13]);
    }

    #[test]
    fn test_unknown_type_skipped_siblings_kept() {
        let store = MemoryStore::new();
        let mut odd = wire_dir("odd", 2);
        odd.file_type = 42;
        let (stored, collector) = push_all(&store, vec![wire_file("a", 10, 1, 1), odd]);
        assert_eq!(stored.len(), 1);
        assert_eq!(collector.delta_file_count, 1);
        assert_eq!(collector.delta_dir_count, 0);
        assert_eq!(collector.delta_size, 10);
    }

    #[test]
    fn test_stale_record_rejected() {
        let store = MemoryStore::new();
        push_all(&store, vec![wire_file("a", 10, 200, 1)]);
        let (stored, collector) = push_all(&store, vec![wire_file("a", 20, 100, 2)]);
        assert!(stored.is_empty());
        assert!(collector.is_empty());
    }

    #[test]
    fn test_push_record_allocates_one_sequence() {
        let store = MemoryStore::new();
        let (stored, seq) = store
            .run_in_transaction(|tx| -> Result<_> {
                let mut collector = FolderStatsUpdateCollector::new("default");
                let stored =
                    push_record(tx, "default", &wire_file("a", 8, 1, 1), &mut collector, None)?;
                Ok((stored, tx.current_sequence()?))
            })
            .unwrap();
        assert_eq!(seq, 1);
        assert_eq!(stored.unwrap().sequence, 1);
    }

    #[test]
    fn test_push_record_rejects_stale() {
        let store = MemoryStore::new();
        let old = FileInfo::new("default", "a", FileKind::Directory)
            .with_last_modified(FileLastModifiedTime::new(500, 0));
        let stored = store
            .run_in_transaction(|tx| -> Result<_> {
                let mut collector = FolderStatsUpdateCollector::new("default");
                push_record(tx, "default", &wire_dir("a", 1), &mut collector, Some(&old))
            })
            .unwrap();
        assert!(stored.is_none());
    }

    #[test]
    fn test_stats_fold_create_then_delete_cancels() {
        let created = FileInfo::new(
            "default",
            "a",
            FileKind::File {
                hash: String::new(),
                size: 100,
                invalid: true,
            },
        );
        let deleted = created.clone().with_deleted(true);

        let mut first = FolderStatsUpdateCollector::new("default");
        update_folder_stats_collector(None, &created, &mut first);
        assert_eq!((first.delta_size, first.delta_file_count), (100, 1));

        let mut second = FolderStatsUpdateCollector::new("default");
        update_folder_stats_collector(Some(&created), &deleted, &mut second);
        assert_eq!((second.delta_size, second.delta_file_count), (-100, -1));
    }

    #[test]
    fn test_stats_fold_same_record_is_zero() {
        let dir = FileInfo::new("default", "d", FileKind::Directory);
        let mut c = FolderStatsUpdateCollector::new("default");
        update_folder_stats_collector(Some(&dir), &dir, &mut c);
        assert_eq!((c.delta_dir_count, c.delta_file_count, c.delta_size), (0, 0, 0));
        assert!(c.last_modified.is_some());
    }

    #[test]
    fn test_symlinks_not_counted() {
        let link = FileInfo::new("default", "l", FileKind::Symlink { target: "x".into() });
        let mut c = FolderStatsUpdateCollector::new("default");
        update_folder_stats_collector(None, &link, &mut c);
        assert_eq!((c.delta_dir_count, c.delta_file_count, c.delta_size), (0, 0, 0));
    }
}
