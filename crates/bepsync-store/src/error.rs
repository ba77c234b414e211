//! Error types for the store module.

use thiserror::Error;

use bepsync_core::CoreError;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A record failed model validation on write.
    #[error("invalid record: {0}")]
    Model(#[from] CoreError),

    /// Block list serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid data in storage or a violated store constraint.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The transaction body failed and the transaction was rolled back.
    #[error("transaction rolled back")]
    RolledBack,

    /// The store lock was poisoned by a panicking writer.
    #[error("store lock poisoned: {0}")]
    LockPoisoned(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
