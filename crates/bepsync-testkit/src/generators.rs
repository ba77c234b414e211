//! Proptest generators for property-based testing.

use proptest::prelude::*;

use bepsync_bep::messages::{Counter, FileInfoType, WireBlockInfo, WireFileInfo};
use bepsync_core::DeviceId;

/// Generate a random DeviceId.
pub fn device_id() -> impl Strategy<Value = DeviceId> {
    any::<[u8; 32]>().prop_map(DeviceId::from_bytes)
}

/// Generate a short relative path from a small alphabet so that collisions
/// are common.
pub fn path() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(vec!["a", "b", "c"]), 1..=3)
        .prop_map(|parts| parts.join("/"))
}

/// Generate a modification time in seconds.
pub fn modified_s() -> impl Strategy<Value = i64> {
    0i64..1_000
}

/// Generate a non-empty version vector.
pub fn version() -> impl Strategy<Value = Vec<Counter>> {
    prop::collection::vec(
        (1u64..4, 1u64..100).prop_map(|(id, value)| Counter { id, value }),
        1..=3,
    )
}

/// Generate a block list and the total size it covers.
pub fn blocks() -> impl Strategy<Value = (Vec<WireBlockInfo>, i64)> {
    prop::collection::vec((1i32..4096, any::<[u8; 32]>()), 0..4).prop_map(|raw| {
        let mut offset = 0i64;
        let blocks = raw
            .into_iter()
            .map(|(size, hash)| {
                let block = WireBlockInfo {
                    offset,
                    size,
                    hash: hash.to_vec(),
                    weak_hash: 0,
                };
                offset += size as i64;
                block
            })
            .collect();
        (blocks, offset)
    })
}

/// Generate a valid record for `name`: a live or deleted file, a directory
/// or a symlink. Sequence is 1.
pub fn wire_record(name: &'static str) -> impl Strategy<Value = WireFileInfo> {
    let file = (blocks(), any::<bool>()).prop_map(|((blocks, size), deleted)| {
        if deleted {
            (FileInfoType::File, Vec::new(), 0, true, String::new())
        } else {
            (FileInfoType::File, blocks, size, false, String::new())
        }
    });
    let dir = any::<bool>()
        .prop_map(|deleted| (FileInfoType::Directory, Vec::new(), 0, deleted, String::new()));
    let symlink = "[a-z]{1,8}"
        .prop_map(|target| (FileInfoType::Symlink, Vec::new(), 0, false, target));

    (prop_oneof![file, dir, symlink], modified_s(), version()).prop_map(
        move |((file_type, blocks, size, deleted, symlink_target), modified_s, version)| {
            WireFileInfo {
                name: name.to_string(),
                file_type: file_type.to_i32(),
                size,
                modified_s,
                deleted,
                version,
                sequence: 1,
                blocks,
                symlink_target,
                ..Default::default()
            }
        },
    )
}

/// Generate a sequence of valid records over colliding paths with distinct,
/// increasing sequence numbers.
pub fn wire_records(max_len: usize) -> impl Strategy<Value = Vec<WireFileInfo>> {
    prop::collection::vec((path(), wire_record("")), 0..=max_len).prop_map(|records| {
        records
            .into_iter()
            .enumerate()
            .map(|(i, (path, record))| WireFileInfo {
                name: path,
                sequence: i as i64 + 1,
                ..record
            })
            .collect()
    })
}

/// Generate a type tag the protocol does not support.
pub fn unsupported_file_type() -> impl Strategy<Value = i32> {
    prop_oneof![
        Just(FileInfoType::SymlinkFile.to_i32()),
        Just(FileInfoType::SymlinkDirectory.to_i32()),
        5i32..1000,
        i32::MIN..0,
    ]
}
