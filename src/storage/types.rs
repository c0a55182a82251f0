//! Core data types for the storage layer.
//!
//! - [`ProbeRecord`]: Lifecycle record of one probe, owned by the registry
//! - [`ReportSnapshot`]: One completed scan report as uploaded by an agent
//! - [`StoredReport`]: A snapshot as accepted by the collector (receipt time + sequence id)
//! - [`LogChunk`]: One log tail upload with its line counters

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

// =============================================================================
// Probe lifecycle
// =============================================================================

/// Connectivity status derived from the last contact time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProbeStatus {
    /// Contacted within the liveness window.
    Connected,
    /// Silent for longer than the liveness window.
    Disconnected,
}

/// Lifecycle record for a single probe.
///
/// `registered_at` is set on first contact and never changes afterwards.
/// `last_contact_at` only moves forward, so `registered_at <= last_contact_at`
/// holds for every record a registry hands out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRecord {
    /// Stable identity chosen by the agent.
    pub probe_id: String,
    /// Human-readable name, updated on every registration.
    pub display_name: String,
    /// First registration time (collector clock).
    pub registered_at: DateTime<Utc>,
    /// Most recent successful inbound call (collector clock).
    pub last_contact_at: DateTime<Utc>,
}

impl ProbeRecord {
    /// Create a record for a probe contacting the collector for the first time.
    pub fn new(
        probe_id: impl Into<String>,
        display_name: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            probe_id: probe_id.into(),
            display_name: display_name.into(),
            registered_at: at,
            last_contact_at: at,
        }
    }

    /// Record a contact at `at`. Older timestamps never move the record backwards.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_contact_at {
            self.last_contact_at = at;
        }
    }

    /// Time elapsed since the last contact, as seen at `now`.
    pub fn silence(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.last_contact_at
    }

    /// Derive the connectivity status at `now` for the given liveness window.
    ///
    /// The boundary is inclusive: a probe silent for exactly `window` is still connected.
    pub fn status_at(&self, now: DateTime<Utc>, window: Duration) -> ProbeStatus {
        let window = TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
        if self.silence(now) <= window {
            ProbeStatus::Connected
        } else {
            ProbeStatus::Disconnected
        }
    }
}

// =============================================================================
// Scan reports
// =============================================================================

/// Aggregate counters of a scan. All four fields are required on upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total_hosts: u32,
    pub hosts_up: u32,
    pub hosts_down: u32,
    pub total_ports_open: u32,
}

/// Reachability of a discovered host.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum HostState {
    Up,
    Down,
    #[default]
    #[serde(other)]
    Unknown,
}

/// State of a probed port.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PortState {
    /// Connection accepted.
    Open,
    /// Connection actively refused: the host answered.
    Closed,
    /// No answer within the timeout.
    Filtered,
    #[serde(other)]
    Unknown,
}

/// Best operating system guess for a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsGuess {
    pub name: String,
    #[serde(default)]
    pub accuracy: u8,
}

/// A service discovered on a host port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub port: u16,
    pub state: PortState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// One host found during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    #[serde(alias = "ip")]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default)]
    pub state: HostState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<OsGuess>,
    #[serde(default, alias = "ports")]
    pub services: Vec<ServiceRecord>,
}

impl HostRecord {
    /// Number of services in the `open` state.
    pub fn open_ports(&self) -> usize {
        self.services
            .iter()
            .filter(|s| s.state == PortState::Open)
            .count()
    }
}

/// A completed scan report as produced by an agent.
///
/// `captured_at` is the agent's own clock and is stored as given. `probe_id` is
/// overwritten by the collector with the id from the request path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSnapshot {
    #[serde(default)]
    pub probe_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_id: Option<String>,
    #[serde(default, alias = "timestamp")]
    pub captured_at: Option<DateTime<Utc>>,
    pub summary: ScanSummary,
    #[serde(default)]
    pub wan_latency_ms: Option<f64>,
    #[serde(default)]
    pub scan_duration_seconds: f64,
    #[serde(default)]
    pub hosts: Vec<HostRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    /// Scanner failure marker. Reports carrying it are still accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReportSnapshot {
    /// Build a report from scanned hosts, deriving the summary counters.
    pub fn from_hosts(probe_id: impl Into<String>, hosts: Vec<HostRecord>) -> Self {
        let summary = ScanSummary {
            total_hosts: hosts.len() as u32,
            hosts_up: hosts.iter().filter(|h| h.state == HostState::Up).count() as u32,
            hosts_down: hosts.iter().filter(|h| h.state != HostState::Up).count() as u32,
            total_ports_open: hosts.iter().map(HostRecord::open_ports).sum::<usize>() as u32,
        };

        Self {
            probe_id: probe_id.into(),
            scan_id: None,
            captured_at: None,
            summary,
            wan_latency_ms: None,
            scan_duration_seconds: 0.0,
            hosts,
            network: None,
            agent_version: None,
            error: None,
        }
    }

    /// Build a best-effort report for a failed scan: zero counters plus the error marker.
    pub fn failed(probe_id: impl Into<String>, error: impl Into<String>) -> Self {
        let mut report = Self::from_hosts(probe_id, Vec::new());
        report.error = Some(error.into());
        report
    }
}

/// A report accepted by the collector.
///
/// `id` is the store's insertion sequence and orders history entries for a probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReport {
    pub id: i64,
    /// Receipt time (collector clock).
    pub received_at: DateTime<Utc>,
    #[serde(flatten)]
    pub report: ReportSnapshot,
}

impl StoredReport {
    pub fn probe_id(&self) -> &str {
        &self.report.probe_id
    }
}

// =============================================================================
// Log chunks
// =============================================================================

/// One log tail upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogChunk {
    pub probe_id: String,
    /// Agent-side upload timestamp, stored as given.
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Receipt time (collector clock).
    pub received_at: DateTime<Utc>,
    /// Lines available at the agent, not necessarily all sent.
    pub total_lines_at_source: u64,
    /// Lines actually transmitted in `content`.
    pub sent_lines: u64,
    /// Optional agent-side ordering key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    pub content: String,
}

/// Result of a log chunk save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSaveOutcome {
    /// Chunk written and latest pointer swapped.
    Stored,
    /// Chunk older than the stored one by sequence number; nothing written.
    Stale { current: u64 },
}

/// Returns true when `incoming` must not replace a chunk stored with `current`.
pub(crate) fn is_stale_sequence(current: Option<u64>, incoming: Option<u64>) -> bool {
    matches!((current, incoming), (Some(current), Some(incoming)) if incoming < current)
}
