//! In-memory storage backend.
//!
//! Each probe id owns its own map entries; writers for different ids only
//! contend on a dashmap shard for the duration of a pointer swap. Snapshots are
//! published as `Arc`s: a reader clones the pointer and keeps a complete,
//! immutable snapshot regardless of later writes.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::storage::StorageError;
use crate::storage::traits::{LogStore, ProbeRegistry, ReportStore};
use crate::storage::types::{
    LogChunk, LogSaveOutcome, ProbeRecord, ReportSnapshot, StoredReport, is_stale_sequence,
};

/// Volatile store implementing all three storage traits.
#[derive(Default)]
pub struct MemoryStore {
    probes: DashMap<String, ProbeRecord>,
    report_history: DashMap<String, Vec<Arc<StoredReport>>>,
    report_latest: DashMap<String, Arc<StoredReport>>,
    log_chunks: DashMap<String, Vec<Arc<LogChunk>>>,
    log_latest: DashMap<String, Arc<LogChunk>>,
    next_report_id: AtomicI64,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("probes", &self.probes.len())
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn append_chunk(&self, probe_id: String, chunk: Arc<LogChunk>) {
        self.log_chunks.entry(probe_id).or_default().push(chunk);
    }
}

#[async_trait::async_trait]
impl ProbeRegistry for MemoryStore {
    async fn register(
        &self,
        probe_id: &str,
        display_name: &str,
        at: DateTime<Utc>,
    ) -> Result<ProbeRecord, StorageError> {
        let record = self
            .probes
            .entry(probe_id.to_string())
            .and_modify(|r| {
                r.display_name = display_name.to_string();
                r.touch(at);
            })
            .or_insert_with(|| ProbeRecord::new(probe_id, display_name, at));
        Ok(record.value().clone())
    }

    async fn touch(
        &self,
        probe_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ProbeRecord>, StorageError> {
        Ok(self.probes.get_mut(probe_id).map(|mut r| {
            r.touch(at);
            r.value().clone()
        }))
    }

    async fn get(&self, probe_id: &str) -> Result<Option<ProbeRecord>, StorageError> {
        Ok(self.probes.get(probe_id).map(|r| r.value().clone()))
    }

    async fn list(&self) -> Result<Vec<ProbeRecord>, StorageError> {
        let mut records: Vec<ProbeRecord> =
            self.probes.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.probe_id.cmp(&b.probe_id))
        });
        Ok(records)
    }
}

#[async_trait::async_trait]
impl ReportStore for MemoryStore {
    async fn save(
        &self,
        probe_id: &str,
        mut report: ReportSnapshot,
        received_at: DateTime<Utc>,
    ) -> Result<StoredReport, StorageError> {
        report.probe_id = probe_id.to_string();
        let stored = Arc::new(StoredReport {
            id: self.next_report_id.fetch_add(1, Ordering::Relaxed) + 1,
            received_at,
            report,
        });

        // History entry first, pointer swap second.
        self.report_history
            .entry(probe_id.to_string())
            .or_default()
            .push(Arc::clone(&stored));
        self.report_latest
            .insert(probe_id.to_string(), Arc::clone(&stored));

        Ok(stored.as_ref().clone())
    }

    async fn latest(&self, probe_id: &str) -> Result<Option<StoredReport>, StorageError> {
        Ok(self
            .report_latest
            .get(probe_id)
            .map(|r| r.value().as_ref().clone()))
    }

    async fn history(
        &self,
        probe_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<StoredReport>, StorageError> {
        let Some(entries) = self.report_history.get(probe_id) else {
            return Ok(Vec::new());
        };
        let skip = limit
            .map(|l| entries.len().saturating_sub(l as usize))
            .unwrap_or(0);
        Ok(entries
            .iter()
            .skip(skip)
            .map(|r| r.as_ref().clone())
            .collect())
    }
}

#[async_trait::async_trait]
impl LogStore for MemoryStore {
    async fn save_chunk(&self, chunk: LogChunk) -> Result<LogSaveOutcome, StorageError> {
        let probe_id = chunk.probe_id.clone();
        let chunk = Arc::new(chunk);

        // The pointer entry stays locked across the staleness check, the body
        // write and the swap, so chunks for one probe cannot interleave.
        match self.log_latest.entry(probe_id.clone()) {
            Entry::Occupied(mut current) => {
                if is_stale_sequence(current.get().sequence, chunk.sequence) {
                    return Ok(LogSaveOutcome::Stale {
                        current: current.get().sequence.unwrap_or_default(),
                    });
                }
                self.append_chunk(probe_id, Arc::clone(&chunk));
                current.insert(chunk);
            }
            Entry::Vacant(slot) => {
                self.append_chunk(probe_id, Arc::clone(&chunk));
                slot.insert(chunk);
            }
        }

        Ok(LogSaveOutcome::Stored)
    }

    async fn latest(&self, probe_id: &str) -> Result<Option<LogChunk>, StorageError> {
        Ok(self
            .log_latest
            .get(probe_id)
            .map(|c| c.value().as_ref().clone()))
    }
}
