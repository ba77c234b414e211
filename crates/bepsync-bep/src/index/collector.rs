use bepsync_core::FileLastModifiedTime;

/// Folder stats changes accumulated over one message-processing pass, flushed
/// to the store in a single update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderStatsUpdateCollector {
    pub folder: String,
    pub delta_file_count: i64,
    pub delta_dir_count: i64,
    pub delta_size: i64,
    /// Modification time of the last folded record.
    pub last_modified: Option<FileLastModifiedTime>,
}

impl FolderStatsUpdateCollector {
    pub fn new(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            delta_file_count: 0,
            delta_dir_count: 0,
            delta_size: 0,
            last_modified: None,
        }
    }

    /// Nothing to write.
    pub fn is_empty(&self) -> bool {
        self.delta_file_count == 0
            && self.delta_dir_count == 0
            && self.delta_size == 0
            && self.last_modified.is_none()
    }
}
