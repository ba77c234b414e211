//! Error types for the protocol layer.

use bepsync_core::DeviceId;
use thiserror::Error;

use crate::codec::CodecError;

/// Errors raised by connections and index processing.
#[derive(Debug, Error)]
pub enum BepError {
    /// The peer broke the message order or id contract.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The peer's certificate does not belong to the expected device.
    #[error("authentication failed: expected {expected}, got {actual}")]
    Authentication { expected: DeviceId, actual: DeviceId },

    /// The peer's hello was rejected.
    #[error("invalid hello: {0}")]
    InvalidHello(String),

    /// An index message arrived for a folder the peer is not a known member of.
    #[error("no index info for device {device} in folder {folder}")]
    IndexInfoNotFound { device: DeviceId, folder: String },

    /// Transport-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The connection is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation was abandoned because the connection shut down first.
    #[error("cancelled")]
    Cancelled,

    /// No route to the requested device address.
    #[error("unknown address: {0}")]
    UnknownAddress(String),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] bepsync_store::StoreError),

    /// Model validation failed.
    #[error("model error: {0}")]
    Core(#[from] bepsync_core::CoreError),

    /// A blocking store task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Worker(String),
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, BepError>;
