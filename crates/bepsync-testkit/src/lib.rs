//! # bepsync testkit
//!
//! Testing utilities for bepsync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a local device with an in-memory index and connector
//! - **Scripted peers**: the remote end of a connection, driven by hand
//! - **Generators**: Proptest strategies for wire file records
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use bepsync_testkit::fixtures::{wire_file, TestFixture};
//!
//! let local = TestFixture::new("laptop");
//! let peer = TestFixture::new("desktop");
//! let local = local.share_folder("default", &[peer.device_id]);
//! let (handle, task) = local.connect(&peer, "desktop:22000");
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use bepsync_testkit::generators::wire_record;
//!
//! proptest! {
//!     #[test]
//!     fn records_have_versions(record in wire_record("a")) {
//!         prop_assert!(!record.version.is_empty());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{wire_deleted, wire_dir, wire_file, wire_symlink, ScriptedPeer, TestFixture};
