//! Error types for the bepsync core.

use thiserror::Error;

/// Errors raised while building or validating model values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("block list for {folder}/{path} does not match file record: {reason}")]
    BlocksMismatch {
        folder: String,
        path: String,
        reason: &'static str,
    },

    #[error("file blocks require a file record, got {0}")]
    BlocksOnNonFile(&'static str),

    #[error("record {0} has no version entries")]
    MissingVersion(String),

    #[error("invalid block hash: {0}")]
    InvalidBlockHash(#[from] hex::FromHexError),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
