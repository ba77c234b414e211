//! Error types for the client.

use bepsync_core::{CoreError, DeviceId};
use bepsync_bep::BepError;
use bepsync_store::StoreError;
use thiserror::Error;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Protocol or connection error.
    #[error("protocol error: {0}")]
    Bep(#[from] BepError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Model error, such as a malformed device id.
    #[error("model error: {0}")]
    Core(#[from] CoreError),

    /// Configuration could not be read.
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed.
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration is inconsistent.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// No address is configured for the device.
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
