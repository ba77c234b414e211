//! # bepsync store
//!
//! Transactional persistence for the local index: file records, block lists,
//! per-peer progress markers, folder stats and the local sequencer.
//!
//! ## Key Types
//!
//! - [`IndexTransaction`] - Operations available inside one transaction
//! - [`IndexRepository`] - Hands out transactions; commit on success, rollback on error
//! - [`IndexRepositoryExt`] - Typed `run_in_transaction` on top of any repository
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bepsync_store::{IndexRepositoryExt, SqliteStore};
//!
//! let store = SqliteStore::open("index.db").unwrap();
//! let range = store
//!     .run_in_transaction(|tx| tx.next_sequences(3))
//!     .unwrap();
//! assert_eq!(range.end - range.start, 3);
//! ```
//!
//! ## Design Notes
//!
//! - **Single writer**: both backends serialize transactions under one mutex,
//!   so concurrent updates of the same folder stats cannot be lost.
//! - **Atomic sequences**: sequence numbers allocated in a rolled-back
//!   transaction are handed out again.
//! - **Checked blocks**: a block list is only written next to a matching file
//!   record.

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{IndexRepository, IndexRepositoryExt, IndexTransaction};
