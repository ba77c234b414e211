//! # bepsync
//!
//! A Block Exchange Protocol client: authenticated connections to peer
//! devices, last-modified-wins reconciliation of their file indexes, and a
//! persistent local index.
//!
//! ## Crates
//!
//! - [`core`] - Data model: file records, block lists, index progress, stats
//! - [`store`] - Transactional index store (SQLite and in-memory)
//! - [`bep`] - Wire protocol, connection actor and index reconciliation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bepsync::{init_tracing, ClientConfig, SyncClient};
//! use bepsync::bep::MemoryConnector;
//!
//! async fn example() -> bepsync::Result<()> {
//!     init_tracing();
//!     let config = ClientConfig::from_json_file("bepsync.json")?;
//!     let client = SyncClient::new(&config, Arc::new(MemoryConnector::new()))?;
//!     for device in client.connect_all().await {
//!         println!("connected to {device}");
//!     }
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod logging;

pub use bepsync_bep as bep;
pub use bepsync_core as core;
pub use bepsync_store as store;

pub use client::{ClientConfig, FolderEntry, PeerConfig, SyncClient};
pub use error::{ClientError, Result};
pub use logging::init_tracing;
