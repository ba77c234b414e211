//! # bepsync bep
//!
//! Block Exchange Protocol connections and index reconciliation.
//!
//! ## Overview
//!
//! A [`ConnectionActor`] owns one authenticated connection to a peer device.
//! It exchanges Hellos and ClusterConfigs, then merges every Index and
//! IndexUpdate the peer sends into the local store through the
//! [`IndexHandler`], answers requests, and keeps the link alive with pings.
//!
//! ## Message Flow
//!
//! ```text
//! Local                               Peer
//!   |-------- Hello ------------------>|
//!   |<------- Hello -------------------|
//!   |      (certificate check)         |
//!   |-------- ClusterConfig ---------->|
//!   |<------- ClusterConfig -----------|
//!   |-------- Index (empty) ---------->|
//!   |<------- Index / IndexUpdate -----|
//!   |-------- Request ---------------->|
//!   |<------- Response ----------------|
//!   |<------- Ping ------------------->|
//!   |-------- Close ------------------>|
//! ```
//!
//! ## Reconciliation
//!
//! Incoming records are applied last-modified-wins. Each message is processed
//! in one store transaction: accepted records get contiguous local sequence
//! numbers, folder stats are adjusted by the net delta, and the peer's
//! progress marker advances to the highest sequence seen.

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod index;
pub mod messages;
pub mod transport;

pub use codec::CodecError;
pub use config::{Configuration, ConnectionConfig, FolderConfig};
pub use connection::{
    ClusterConfigInfo, ConnectionActor, ConnectionContext, ConnectionHandle, ConnectionState,
    RejectingRequestHandler, RequestHandler, Wire,
};
pub use error::{BepError, Result};
pub use index::{IndexEvent, IndexHandler, IndexMessageResult};
pub use messages::{Message, WireFileInfo};
pub use transport::{memory::MemoryConnector, AuthenticatedStream, ByteStream, Connector};
