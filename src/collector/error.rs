//! Collector error types.

use thiserror::Error;

use crate::storage::StorageError;

/// Errors returned by [`crate::collector::Collector`] operations.
///
/// `Validation` and `NotFound` are raised before any write, so neither leaves
/// state behind.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Malformed or missing request fields.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Unknown probe, or no data stored for it yet.
    #[error("{0}")]
    NotFound(String),

    /// Transient storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CollectorError {
    pub(crate) fn unknown_probe(probe_id: &str) -> Self {
        Self::NotFound(format!("probe '{probe_id}' not found"))
    }
}
