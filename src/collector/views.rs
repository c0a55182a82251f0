//! Read-side views returned by the collector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{HostRecord, ProbeRecord, ProbeStatus, ScanSummary, StoredReport};

/// A registry record enriched with derived status and its latest report digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeView {
    #[serde(flatten)]
    pub record: ProbeRecord,
    pub status: ProbeStatus,
    /// Whole seconds since the last contact; zero when the agent is ahead of us.
    pub last_seen_ago_seconds: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_report: Option<ReportDigest>,
}

/// The parts of a latest report shown alongside a probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDigest {
    pub captured_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub summary: ScanSummary,
    pub wan_latency_ms: Option<f64>,
    pub scan_duration_seconds: f64,
    pub hosts: Vec<HostRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<StoredReport> for ReportDigest {
    fn from(stored: StoredReport) -> Self {
        Self {
            captured_at: stored.report.captured_at,
            received_at: stored.received_at,
            summary: stored.report.summary,
            wan_latency_ms: stored.report.wan_latency_ms,
            scan_duration_seconds: stored.report.scan_duration_seconds,
            hosts: stored.report.hosts,
            error: stored.report.error,
        }
    }
}

/// Fleet-wide aggregates, recomputed per call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetStatistics {
    pub total_probes: usize,
    pub connected_probes: usize,
    pub disconnected_probes: usize,
    /// Sum of `hosts_up` over every probe's latest report.
    pub total_equipment: u64,
    /// Mean of non-null latest latencies, two decimals; `0` when there are none.
    pub average_wan_latency: f64,
}

/// Body of `GET /api/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub version: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub statistics: FleetStatistics,
}

/// Result of a log upload as reported to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadAck {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl UploadAck {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn stale() -> Self {
        Self {
            accepted: false,
            reason: Some("stale".to_string()),
        }
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
