//! Storage builder and handles.
//!
//! Provides a builder pattern for selecting a backend and a handles struct
//! exposing the registry, report and log stores as trait objects.

use std::path::Path;
use std::sync::Arc;

use crate::storage::StorageError;
use crate::storage::db::{DEFAULT_MAX_CONNECTIONS, SqlitePool};
use crate::storage::memory::MemoryStore;
use crate::storage::sqlite_store::SqliteStore;
use crate::storage::traits::{LogStore, ProbeRegistry, ReportStore};

/// Which backend to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Volatile, process-local maps.
    Memory,
    /// SQLite database at the given connection URL.
    Sqlite { url: String },
}

/// Builder for constructing the storage layer.
#[derive(Debug, Clone)]
pub struct StorageBuilder {
    backend: StorageBackend,
    max_connections: u32,
}

impl StorageBuilder {
    pub fn new(backend: StorageBackend) -> Self {
        Self {
            backend,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Shorthand for the in-memory backend.
    pub fn memory() -> Self {
        Self::new(StorageBackend::Memory)
    }

    /// Shorthand for the SQLite backend.
    pub fn sqlite(url: impl Into<String>) -> Self {
        Self::new(StorageBackend::Sqlite { url: url.into() })
    }

    /// Set the SQLite connection pool size. Ignored by the memory backend.
    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    /// Build the storage layer and return handles.
    pub async fn build(self) -> Result<StorageHandles, StorageError> {
        match self.backend {
            StorageBackend::Memory => {
                let store = Arc::new(MemoryStore::new());
                tracing::info!("Using in-memory storage, data will not survive a restart");
                Ok(StorageHandles {
                    registry: store.clone(),
                    reports: store.clone(),
                    logs: store,
                    pool: None,
                })
            }
            StorageBackend::Sqlite { url } => {
                ensure_parent_dir(&url)?;
                let store = Arc::new(SqliteStore::open(&url, self.max_connections).await?);
                let pool = store.pool().clone();
                tracing::info!(url = %url, "Using SQLite storage");
                Ok(StorageHandles {
                    registry: store.clone(),
                    reports: store.clone(),
                    logs: store,
                    pool: Some(pool),
                })
            }
        }
    }
}

/// Create the directory holding a file-backed SQLite database.
fn ensure_parent_dir(url: &str) -> Result<(), StorageError> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }

    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            StorageError::Internal(format!(
                "Failed to create database directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }
    Ok(())
}

/// Handles to the storage layer.
#[derive(Clone)]
pub struct StorageHandles {
    pub registry: Arc<dyn ProbeRegistry>,
    pub reports: Arc<dyn ReportStore>,
    pub logs: Arc<dyn LogStore>,
    pool: Option<SqlitePool>,
}

impl std::fmt::Debug for StorageHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandles")
            .field("durable", &self.pool.is_some())
            .finish_non_exhaustive()
    }
}

impl StorageHandles {
    /// Whether the backend survives a process restart.
    pub fn is_durable(&self) -> bool {
        self.pool.is_some()
    }

    /// Gracefully shutdown the storage layer, closing database connections.
    pub async fn shutdown(self) {
        if let Some(pool) = self.pool {
            pool.close().await;
            tracing::debug!("Storage pool closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn test_build_memory_backend() {
        let handles = StorageBuilder::memory().build().await.unwrap();
        assert!(!handles.is_durable());

        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        handles.registry.register("nw7", "Example FC", at).await.unwrap();
        assert_eq!(handles.registry.list().await.unwrap().len(), 1);

        handles.shutdown().await;
    }

    #[tokio::test]
    async fn test_build_sqlite_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("deeper").join("fleet.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        let handles = StorageBuilder::sqlite(&url)
            .max_connections(2)
            .build()
            .await
            .unwrap();
        assert!(handles.is_durable());
        assert!(db_path.exists());

        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        handles.registry.register("nw7", "Example FC", at).await.unwrap();
        assert!(handles.registry.get("nw7").await.unwrap().is_some());

        handles.shutdown().await;
    }

    #[test]
    fn test_ensure_parent_dir_ignores_memory_urls() {
        ensure_parent_dir("sqlite::memory:").unwrap();
        ensure_parent_dir("sqlite://:memory:").unwrap();
    }
}
