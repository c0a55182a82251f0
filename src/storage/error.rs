//! Storage-specific error types.
//!
//! All storage operations return [`StorageError`] on failure. The collector
//! surfaces any of them as a transient I/O failure of the request that hit it;
//! a failed write never leaves a half-swapped latest pointer behind.

use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed (sqlx error).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid data in database (e.g., out-of-range timestamp).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Internal error (e.g., directory creation failure).
    #[error("internal error: {0}")]
    Internal(String),
}
