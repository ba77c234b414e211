//! Replication progress and folder aggregates.

use serde::{Deserialize, Serialize};

use crate::types::DeviceId;

/// How much of one peer's index for one folder has been applied locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub folder: String,
    pub device_id: DeviceId,
    /// The peer's index epoch. A new epoch invalidates `local_sequence`.
    pub index_id: u64,
    /// Highest peer sequence applied here.
    pub local_sequence: i64,
    /// Highest sequence the peer claims to have.
    pub max_sequence: i64,
}

impl IndexInfo {
    /// A fresh marker: nothing applied, nothing known.
    pub fn new(folder: impl Into<String>, device_id: DeviceId, index_id: u64) -> Self {
        Self {
            folder: folder.into(),
            device_id,
            index_id,
            local_sequence: 0,
            max_sequence: -1,
        }
    }

    /// Whether everything the peer announced has been applied.
    pub fn is_up_to_date(&self) -> bool {
        self.local_sequence >= self.max_sequence
    }

    /// Fraction of the peer's announced index applied so far, in `[0, 1]`.
    pub fn completion(&self) -> f64 {
        if self.max_sequence <= 0 || self.is_up_to_date() {
            return 1.0;
        }
        (self.local_sequence.max(0) as f64 / self.max_sequence as f64).clamp(0.0, 1.0)
    }
}

/// Aggregate counters of one folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderStats {
    pub folder: String,
    pub file_count: i64,
    pub dir_count: i64,
    /// Total size of non-deleted files in bytes.
    pub size: i64,
    /// Unix millis of the newest applied change.
    pub last_update: i64,
}

impl FolderStats {
    /// Zero-valued stats for a folder with no row yet.
    pub fn empty(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            file_count: 0,
            dir_count: 0,
            size: 0,
            last_update: 0,
        }
    }

    /// Number of counted records (files and directories).
    pub fn record_count(&self) -> i64 {
        self.file_count + self.dir_count
    }

    pub fn is_non_negative(&self) -> bool {
        self.file_count >= 0 && self.dir_count >= 0 && self.size >= 0
    }
}
