//! Block Exchange Protocol message types.
//!
//! Field sets follow the BEP schema. Only the hello travels before
//! authentication; everything else is a [`Message`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use bepsync_core::DeviceId;

/// Pre-authentication greeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub device_name: String,
    pub client_name: String,
    pub client_version: String,
}

/// Folders and devices shared on this connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub folders: Vec<Folder>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub label: String,
    pub read_only: bool,
    pub ignore_permissions: bool,
    pub ignore_delete: bool,
    pub disable_temp_indexes: bool,
    pub paused: bool,
    pub devices: Vec<Device>,
}

/// A device's view of one shared folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub addresses: Vec<String>,
    /// Highest sequence of this device's index the sender knows of.
    pub max_sequence: i64,
    pub introducer: bool,
    /// Epoch of this device's index.
    pub index_id: u64,
}

impl Device {
    pub fn new(id: DeviceId, name: impl Into<String>, index_id: u64, max_sequence: i64) -> Self {
        Self {
            id,
            name: name.into(),
            addresses: Vec::new(),
            max_sequence,
            introducer: false,
            index_id,
        }
    }
}

/// Full index of a folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub folder: String,
    pub files: Vec<WireFileInfo>,
}

/// Incremental index changes of a folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexUpdate {
    pub folder: String,
    pub files: Vec<WireFileInfo>,
}

/// Record type tags in BEP numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileInfoType {
    File,
    Directory,
    /// Deprecated in favor of `Symlink`.
    SymlinkFile,
    /// Deprecated in favor of `Symlink`.
    SymlinkDirectory,
    Symlink,
}

impl FileInfoType {
    pub const fn to_i32(self) -> i32 {
        match self {
            FileInfoType::File => 0,
            FileInfoType::Directory => 1,
            FileInfoType::SymlinkFile => 2,
            FileInfoType::SymlinkDirectory => 3,
            FileInfoType::Symlink => 4,
        }
    }

    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(FileInfoType::File),
            1 => Some(FileInfoType::Directory),
            2 => Some(FileInfoType::SymlinkFile),
            3 => Some(FileInfoType::SymlinkDirectory),
            4 => Some(FileInfoType::Symlink),
            _ => None,
        }
    }
}

/// A version vector entry as sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub id: u64,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireBlockInfo {
    pub offset: i64,
    pub size: i32,
    pub hash: Vec<u8>,
    pub weak_hash: u32,
}

/// A file record as sent on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFileInfo {
    pub name: String,
    /// Raw type tag, see [`FileInfoType`].
    pub file_type: i32,
    pub size: i64,
    pub permissions: u32,
    pub modified_s: i64,
    pub modified_ns: i32,
    pub modified_by: u64,
    pub deleted: bool,
    pub invalid: bool,
    pub no_permissions: bool,
    pub version: Vec<Counter>,
    /// The sender's sequence number for this record.
    pub sequence: i64,
    pub block_size: i32,
    pub blocks: Vec<WireBlockInfo>,
    pub symlink_target: String,
}

impl WireFileInfo {
    pub fn file_info_type(&self) -> Option<FileInfoType> {
        FileInfoType::from_i32(self.file_type)
    }
}

/// A block request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, assigned by the sending connection.
    pub id: i32,
    pub folder: String,
    pub name: String,
    pub offset: i64,
    pub size: i32,
    pub hash: Vec<u8>,
    pub from_temporary: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[default]
    NoError,
    Generic,
    NoSuchFile,
    InvalidFile,
}

/// Answer to a [`Request`], echoing its id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: i32,
    pub data: Bytes,
    pub code: ErrorCode,
}

impl Response {
    pub fn error(id: i32, code: ErrorCode) -> Self {
        Self {
            id,
            data: Bytes::new(),
            code,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDownloadProgressUpdate {
    pub name: String,
    pub version: Vec<Counter>,
    pub block_indexes: Vec<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub folder: String,
    pub updates: Vec<FileDownloadProgressUpdate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Close {
    pub reason: String,
}

/// Post-authentication messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    ClusterConfig(ClusterConfig),
    Index(Index),
    IndexUpdate(IndexUpdate),
    Request(Request),
    Response(Response),
    DownloadProgress(DownloadProgress),
    Ping,
    Close(Close),
}

impl Message {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::ClusterConfig(_) => "cluster_config",
            Message::Index(_) => "index",
            Message::IndexUpdate(_) => "index_update",
            Message::Request(_) => "request",
            Message::Response(_) => "response",
            Message::DownloadProgress(_) => "download_progress",
            Message::Ping => "ping",
            Message::Close(_) => "close",
        }
    }
}
