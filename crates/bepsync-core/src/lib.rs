//! # bepsync core
//!
//! Pure data model for the Block Exchange Protocol client: file records,
//! block lists, per-peer index progress and per-folder aggregate stats.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`FileInfo`] - A file, directory or symlink record in a shared folder
//! - [`FileKind`] - The closed set of record variants
//! - [`FileBlocks`] - The ordered block list backing a file record
//! - [`IndexInfo`] - How much of a peer's index has been applied locally
//! - [`FolderStats`] - Aggregate counters for one folder
//! - [`DeviceId`] - A device identity derived from its certificate

pub mod error;
pub mod file;
pub mod index;
pub mod path;
pub mod types;

pub use error::{CoreError, Result};
pub use file::{BlockInfo, FileBlocks, FileInfo, FileKind};
pub use index::{FolderStats, IndexInfo};
pub use types::{DeviceId, FileLastModifiedTime, FileVersion};
