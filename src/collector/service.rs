//! The collector service: validation, per-probe serialization and delegation
//! to the stores.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::collector::clock::{Clock, SystemClock};
use crate::collector::locks::ProbeLocks;
use crate::collector::validation::{
    normalize_display_name, parse_log_upload, parse_report, validate_probe_id,
};
use crate::collector::views::{FleetStatistics, ProbeView, ServiceStatus, round2};
use crate::collector::CollectorError;
use crate::storage::{
    LogChunk, LogSaveOutcome, LogStore, ProbeRecord, ProbeRegistry, ProbeStatus, ReportStore,
    StorageHandles, StoredReport,
};

/// Default liveness window (5 minutes).
pub const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_secs(300);

/// Default number of history entries returned.
pub const DEFAULT_HISTORY_LIMIT: u32 = 20;

/// Upper bound on history entries returned in one call.
pub const MAX_HISTORY_LIMIT: u32 = 500;

/// Collector behaviour knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorSettings {
    /// Maximum silence before a probe is reported as disconnected.
    pub liveness_window: Duration,
    /// Create a minimal record when an unknown probe sends a heartbeat, report or logs.
    pub auto_register: bool,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            liveness_window: DEFAULT_LIVENESS_WINDOW,
            auto_register: true,
        }
    }
}

/// Central service behind the HTTP boundary.
///
/// Writes for one `probe_id` are serialized through [`ProbeLocks`]; reads take
/// no locks and observe the latest committed state per probe.
pub struct Collector {
    registry: Arc<dyn ProbeRegistry>,
    reports: Arc<dyn ReportStore>,
    logs: Arc<dyn LogStore>,
    clock: Arc<dyn Clock>,
    locks: ProbeLocks,
    settings: CollectorSettings,
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("settings", &self.settings)
            .field("locked_ids", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl Collector {
    pub fn new(
        registry: Arc<dyn ProbeRegistry>,
        reports: Arc<dyn ReportStore>,
        logs: Arc<dyn LogStore>,
        settings: CollectorSettings,
    ) -> Self {
        Self {
            registry,
            reports,
            logs,
            clock: Arc::new(SystemClock),
            locks: ProbeLocks::new(),
            settings,
        }
    }

    /// Build a collector over the stores of an initialized storage layer.
    pub fn from_handles(handles: &StorageHandles, settings: CollectorSettings) -> Self {
        Self::new(
            Arc::clone(&handles.registry),
            Arc::clone(&handles.reports),
            Arc::clone(&handles.logs),
            settings,
        )
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    // =========================================================================
    // Write operations
    // =========================================================================

    /// Register a probe, or refresh its display name if already known.
    pub async fn register_probe(
        &self,
        probe_id: &str,
        display_name: &str,
    ) -> Result<ProbeView, CollectorError> {
        validate_probe_id(probe_id)?;
        let display_name = normalize_display_name(display_name)?;

        let _guard = self.locks.lock(probe_id).await;
        let now = self.clock.now();
        let record = self.registry.register(probe_id, &display_name, now).await?;
        tracing::info!(
            probe_id = %probe_id,
            display_name = %record.display_name,
            "Probe registered"
        );

        self.view(record, now).await
    }

    /// Record a liveness signal.
    pub async fn heartbeat(&self, probe_id: &str) -> Result<ProbeView, CollectorError> {
        validate_probe_id(probe_id)?;

        let _guard = self.locks.lock(probe_id).await;
        let now = self.clock.now();
        let record = self.record_contact(probe_id, now).await?;
        tracing::debug!(probe_id = %probe_id, "Heartbeat");

        self.view(record, now).await
    }

    /// Accept a scan report given as a raw JSON body.
    ///
    /// The report is validated before anything is written; on success it
    /// becomes the probe's latest snapshot and the contact time is refreshed.
    pub async fn upload_report(
        &self,
        probe_id: &str,
        body: &[u8],
    ) -> Result<StoredReport, CollectorError> {
        validate_probe_id(probe_id)?;
        let report = parse_report(body)?;

        let _guard = self.locks.lock(probe_id).await;
        let now = self.clock.now();
        // Contact first: it is idempotent, so a failed save leaves nothing to undo.
        self.record_contact(probe_id, now).await?;
        let stored = self.reports.save(probe_id, report, now).await?;

        tracing::info!(
            probe_id = %probe_id,
            report_id = stored.id,
            hosts_up = stored.report.summary.hosts_up,
            wan_latency_ms = ?stored.report.wan_latency_ms,
            failed = stored.report.error.is_some(),
            "Report saved"
        );
        Ok(stored)
    }

    /// Accept a log tail given as a raw JSON body.
    ///
    /// A chunk older than the stored one (by sequence) is dropped but still
    /// counts as contact.
    pub async fn upload_logs(
        &self,
        probe_id: &str,
        body: &[u8],
    ) -> Result<LogSaveOutcome, CollectorError> {
        validate_probe_id(probe_id)?;
        let upload = parse_log_upload(body)?;

        let _guard = self.locks.lock(probe_id).await;
        let now = self.clock.now();
        self.record_contact(probe_id, now).await?;

        let chunk = LogChunk {
            probe_id: probe_id.to_string(),
            uploaded_at: upload.timestamp,
            received_at: now,
            total_lines_at_source: upload.total_lines,
            sent_lines: upload.sent_lines,
            sequence: upload.sequence,
            content: upload.lines,
        };
        let outcome = self.logs.save_chunk(chunk).await?;

        match outcome {
            LogSaveOutcome::Stored => tracing::info!(
                probe_id = %probe_id,
                sent_lines = upload.sent_lines,
                "Logs saved"
            ),
            LogSaveOutcome::Stale { current } => tracing::warn!(
                probe_id = %probe_id,
                sequence = ?upload.sequence,
                current,
                "Ignoring stale log chunk"
            ),
        }
        Ok(outcome)
    }

    // =========================================================================
    // Read operations
    // =========================================================================

    /// Every known probe with derived status, ordered by display name.
    pub async fn probes(&self) -> Result<Vec<ProbeView>, CollectorError> {
        let records = self.registry.list().await?;
        let now = self.clock.now();

        let mut views = Vec::with_capacity(records.len());
        for record in records {
            views.push(self.view(record, now).await?);
        }
        Ok(views)
    }

    /// One probe with derived status.
    pub async fn probe(&self, probe_id: &str) -> Result<ProbeView, CollectorError> {
        let record = self
            .registry
            .get(probe_id)
            .await?
            .ok_or_else(|| CollectorError::unknown_probe(probe_id))?;
        self.view(record, self.clock.now()).await
    }

    pub async fn latest_report(&self, probe_id: &str) -> Result<StoredReport, CollectorError> {
        self.reports
            .latest(probe_id)
            .await?
            .ok_or_else(|| CollectorError::NotFound(format!("no report for probe '{probe_id}'")))
    }

    /// Recent reports oldest to newest. `limit` defaults to
    /// [`DEFAULT_HISTORY_LIMIT`] and is capped at [`MAX_HISTORY_LIMIT`].
    pub async fn report_history(
        &self,
        probe_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<StoredReport>, CollectorError> {
        if self.registry.get(probe_id).await?.is_none() {
            return Err(CollectorError::unknown_probe(probe_id));
        }
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        Ok(self.reports.history(probe_id, Some(limit)).await?)
    }

    pub async fn latest_logs(&self, probe_id: &str) -> Result<LogChunk, CollectorError> {
        self.logs
            .latest(probe_id)
            .await?
            .ok_or_else(|| CollectorError::NotFound(format!("no logs for probe '{probe_id}'")))
    }

    /// Fleet aggregates over the registry and every probe's latest report.
    pub async fn statistics(&self) -> Result<FleetStatistics, CollectorError> {
        let records = self.registry.list().await?;
        let now = self.clock.now();

        let mut stats = FleetStatistics {
            total_probes: records.len(),
            ..Default::default()
        };
        let mut latency_sum = 0.0;
        let mut latency_count = 0u32;

        for record in &records {
            match record.status_at(now, self.settings.liveness_window) {
                ProbeStatus::Connected => stats.connected_probes += 1,
                ProbeStatus::Disconnected => stats.disconnected_probes += 1,
            }

            if let Some(latest) = self.reports.latest(&record.probe_id).await? {
                stats.total_equipment += u64::from(latest.report.summary.hosts_up);
                if let Some(latency) = latest.report.wan_latency_ms {
                    latency_sum += latency;
                    latency_count += 1;
                }
            }
        }

        if latency_count > 0 {
            stats.average_wan_latency = round2(latency_sum / f64::from(latency_count));
        }
        Ok(stats)
    }

    /// Service banner with current statistics.
    pub async fn status(&self) -> Result<ServiceStatus, CollectorError> {
        Ok(ServiceStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: "online".to_string(),
            timestamp: self.clock.now(),
            statistics: self.statistics().await?,
        })
    }

    /// Round-trip the registry to prove the storage backend answers.
    pub async fn ready(&self) -> Result<(), CollectorError> {
        self.registry.list().await?;
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Refresh the contact time. Unknown ids are created, or rejected in strict
    /// mode without any write.
    async fn record_contact(
        &self,
        probe_id: &str,
        at: DateTime<Utc>,
    ) -> Result<ProbeRecord, CollectorError> {
        if self.settings.auto_register {
            return Ok(self.registry.touch_or_create(probe_id, at).await?);
        }
        self.registry.touch(probe_id, at).await?.ok_or_else(|| {
            tracing::warn!(probe_id = %probe_id, "Rejecting call from unregistered probe");
            CollectorError::unknown_probe(probe_id)
        })
    }

    async fn view(
        &self,
        record: ProbeRecord,
        now: DateTime<Utc>,
    ) -> Result<ProbeView, CollectorError> {
        let last_report = self.reports.latest(&record.probe_id).await?.map(Into::into);
        Ok(ProbeView {
            status: record.status_at(now, self.settings.liveness_window),
            last_seen_ago_seconds: record.silence(now).num_seconds().max(0),
            last_report,
            record,
        })
    }
}
