//! Storage Layer
//!
//! Probe records, report snapshots and log chunks, keyed by `probe_id`.
//!
//! # Components
//!
//! - [`ProbeRegistry`] / [`ReportStore`] / [`LogStore`]: Backend-agnostic async traits
//! - [`MemoryStore`]: Volatile backend built on concurrent maps
//! - [`SqliteStore`]: Durable backend on SQLite via sqlx
//! - [`StorageBuilder`] / [`StorageHandles`]: Backend selection and lifecycle management

mod builder;
pub mod db;
mod error;
mod memory;
mod sqlite_store;
mod traits;
mod types;

pub use builder::{StorageBackend, StorageBuilder, StorageHandles};
pub use error::StorageError;
pub use memory::MemoryStore;
pub use sqlite_store::SqliteStore;
pub use traits::{LogStore, ProbeRegistry, ReportStore};
pub use types::{
    HostRecord, HostState, LogChunk, LogSaveOutcome, OsGuess, PortState, ProbeRecord, ProbeStatus,
    ReportSnapshot, ScanSummary, ServiceRecord, StoredReport,
};
