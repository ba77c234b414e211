//! File records and block lists.
//!
//! A [`FileInfo`] describes one entry of a shared folder as last announced by
//! some device. The variant-specific data lives in [`FileKind`], a closed enum:
//! adding a variant forces every consumer (element processor, stats folding,
//! store mapper) to handle it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};
use crate::path;
use crate::types::{FileLastModifiedTime, FileVersion};

/// Permission bits of the dummy folder root.
const ROOT_PERMISSIONS: u32 = 0o066;

/// Variant-specific part of a file record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    /// A regular file.
    File {
        /// Hex SHA-256 over the concatenated block hashes.
        hash: String,
        /// Size in bytes.
        size: i64,
        /// This client does not serve the file's content.
        invalid: bool,
    },
    /// A directory.
    Directory,
    /// A symbolic link.
    Symlink {
        /// Link target as announced by the peer.
        target: String,
    },
}

impl FileKind {
    /// Short name for logs and store columns.
    pub fn type_name(&self) -> &'static str {
        match self {
            FileKind::File { .. } => "file",
            FileKind::Directory => "directory",
            FileKind::Symlink { .. } => "symlink",
        }
    }
}

/// One record of a folder index.
///
/// `file_name` and `parent` are derived from `path` at construction and are
/// only reachable through accessors so they cannot drift from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Folder id the record belongs to.
    pub folder: String,
    path: String,
    file_name: String,
    parent: String,
    /// Modification time announced by the last writer.
    pub last_modified: FileLastModifiedTime,
    /// Short id of the device that made the last change.
    pub last_modified_by: u64,
    /// Tombstone flag.
    pub deleted: bool,
    /// Version vector. The last entry is authoritative.
    pub versions: Vec<FileVersion>,
    /// POSIX permission bits.
    pub permissions: u32,
    /// The announcing platform cannot represent permissions.
    pub no_permissions: bool,
    /// Local sequence number assigned when the record was stored.
    pub sequence: i64,
    /// Variant data.
    pub kind: FileKind,
}

impl FileInfo {
    /// Create a record with zeroed metadata. Use the `with_*` methods to fill
    /// in the rest.
    pub fn new(folder: impl Into<String>, path: impl Into<String>, kind: FileKind) -> Self {
        let path = path.into();
        let file_name = path::file_name(&path).to_string();
        let parent = path::parent(&path).to_string();

        Self {
            folder: folder.into(),
            path,
            file_name,
            parent,
            last_modified: FileLastModifiedTime::EMPTY,
            last_modified_by: 0,
            deleted: false,
            versions: Vec::new(),
            permissions: 0,
            no_permissions: false,
            sequence: 0,
            kind,
        }
    }

    /// The dummy directory record standing for a folder's root.
    pub fn folder_root(folder: impl Into<String>) -> Self {
        Self::new(folder, path::ROOT_PATH, FileKind::Directory)
            .with_permissions(ROOT_PERMISSIONS, true)
    }

    pub fn with_last_modified(mut self, last_modified: FileLastModifiedTime) -> Self {
        self.last_modified = last_modified;
        self
    }

    pub fn with_modified_by(mut self, device_short_id: u64) -> Self {
        self.last_modified_by = device_short_id;
        self
    }

    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    pub fn with_versions(mut self, versions: Vec<FileVersion>) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_permissions(mut self, permissions: u32, no_permissions: bool) -> Self {
        self.permissions = permissions;
        self.no_permissions = no_permissions;
        self
    }

    /// Copy of this record stamped with a local sequence number.
    pub fn with_sequence(mut self, sequence: i64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, FileKind::File { .. })
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, FileKind::Directory)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.kind, FileKind::Symlink { .. })
    }

    /// Size in bytes, files only.
    pub fn size(&self) -> Option<i64> {
        match &self.kind {
            FileKind::File { size, .. } => Some(*size),
            FileKind::Directory | FileKind::Symlink { .. } => None,
        }
    }

    /// Content hash, files only.
    pub fn hash(&self) -> Option<&str> {
        match &self.kind {
            FileKind::File { hash, .. } => Some(hash),
            FileKind::Directory | FileKind::Symlink { .. } => None,
        }
    }

    /// The authoritative version entry.
    pub fn latest_version(&self) -> Option<&FileVersion> {
        self.versions.last()
    }
}

/// One block of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Byte offset in the file.
    pub offset: i64,
    /// Block length in bytes.
    pub size: i32,
    /// Hex-encoded block hash.
    pub hash: String,
}

impl BlockInfo {
    pub fn new(offset: i64, size: i32, hash: impl Into<String>) -> Self {
        Self {
            offset,
            size,
            hash: hash.into(),
        }
    }

    /// Decoded hash bytes.
    pub fn hash_bytes(&self) -> Result<Vec<u8>> {
        Ok(hex::decode(&self.hash)?)
    }
}

/// The ordered block list of a file, with its derived size and hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBlocks {
    folder: String,
    path: String,
    blocks: Vec<BlockInfo>,
    hash: String,
    size: i64,
}

impl FileBlocks {
    /// Build a block list, deriving total size and content hash.
    ///
    /// The content hash is the hex SHA-256 of all block hashes concatenated
    /// in order. Fails if a block hash is not valid hex.
    pub fn new(
        folder: impl Into<String>,
        path: impl Into<String>,
        blocks: Vec<BlockInfo>,
    ) -> Result<Self> {
        let mut hasher = Sha256::new();
        let mut size = 0i64;
        for block in &blocks {
            hasher.update(block.hash_bytes()?);
            size += i64::from(block.size);
        }

        Ok(Self {
            folder: folder.into(),
            path: path.into(),
            blocks,
            hash: hex::encode(hasher.finalize()),
            size,
        })
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn blocks(&self) -> &[BlockInfo] {
        &self.blocks
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    /// Check that this block list belongs to `file_info`.
    pub fn check_against(&self, file_info: &FileInfo) -> Result<()> {
        let mismatch = |reason| CoreError::BlocksMismatch {
            folder: file_info.folder.clone(),
            path: file_info.path.clone(),
            reason,
        };

        let FileKind::File { hash, size, .. } = &file_info.kind else {
            return Err(CoreError::BlocksOnNonFile(file_info.kind.type_name()));
        };

        if self.folder != file_info.folder {
            return Err(mismatch("folder"));
        }
        if self.path != file_info.path {
            return Err(mismatch("path"));
        }
        if self.size != *size {
            return Err(mismatch("size"));
        }
        if &self.hash != hash {
            return Err(mismatch("hash"));
        }
        Ok(())
    }
}
