//! Storage traits keyed by `probe_id`.
//!
//! Every backend honors the same contract: a write produces a new immutable
//! entry first and only then swaps the per-probe latest pointer, so a reader
//! either sees the previous snapshot or the new one, never a mix of both.
//!
//! Timestamps are passed in by the caller. Backends never read the clock.

use chrono::{DateTime, Utc};

use crate::storage::StorageError;
use crate::storage::types::{LogChunk, LogSaveOutcome, ProbeRecord, ReportSnapshot, StoredReport};

/// Lifecycle records, one per probe.
#[async_trait::async_trait]
pub trait ProbeRegistry: Send + Sync + 'static {
    /// Idempotent upsert.
    ///
    /// Creates the record with `registered_at = last_contact_at = at` when absent.
    /// Otherwise updates `display_name` and `last_contact_at`, keeping `registered_at`.
    async fn register(
        &self,
        probe_id: &str,
        display_name: &str,
        at: DateTime<Utc>,
    ) -> Result<ProbeRecord, StorageError>;

    /// Record a contact for an existing probe. Returns `None` when the probe is unknown.
    async fn touch(
        &self,
        probe_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ProbeRecord>, StorageError>;

    /// Record a contact, creating a minimal record (named after its id) when absent.
    async fn touch_or_create(
        &self,
        probe_id: &str,
        at: DateTime<Utc>,
    ) -> Result<ProbeRecord, StorageError> {
        match self.touch(probe_id, at).await? {
            Some(record) => Ok(record),
            None => self.register(probe_id, probe_id, at).await,
        }
    }

    /// Fetch a single record.
    async fn get(&self, probe_id: &str) -> Result<Option<ProbeRecord>, StorageError>;

    /// All records, ordered by `display_name` then `probe_id`.
    async fn list(&self) -> Result<Vec<ProbeRecord>, StorageError>;
}

/// Append-only report history plus one latest pointer per probe.
#[async_trait::async_trait]
pub trait ReportStore: Send + Sync + 'static {
    /// Append `report` to the probe's history and make it the latest snapshot.
    async fn save(
        &self,
        probe_id: &str,
        report: ReportSnapshot,
        received_at: DateTime<Utc>,
    ) -> Result<StoredReport, StorageError>;

    /// The most recently accepted snapshot.
    async fn latest(&self, probe_id: &str) -> Result<Option<StoredReport>, StorageError>;

    /// History ordered oldest to newest. With a limit, only the most recent
    /// `limit` entries are returned (still oldest first).
    async fn history(
        &self,
        probe_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<StoredReport>, StorageError>;
}

/// Durable log chunk bodies plus one latest-chunk pointer per probe.
#[async_trait::async_trait]
pub trait LogStore: Send + Sync + 'static {
    /// Persist the chunk and swap the latest pointer.
    ///
    /// When both the stored and the incoming chunk carry a sequence number and the
    /// incoming one is lower, nothing is written and [`LogSaveOutcome::Stale`] is returned.
    async fn save_chunk(&self, chunk: LogChunk) -> Result<LogSaveOutcome, StorageError>;

    /// The most recent chunk (metadata and content).
    async fn latest(&self, probe_id: &str) -> Result<Option<LogChunk>, StorageError>;
}
