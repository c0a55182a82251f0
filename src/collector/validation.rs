//! Request payloads and their validation.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::collector::CollectorError;
use crate::storage::ReportSnapshot;

/// Maximum probe id length.
pub const MAX_PROBE_ID_LEN: usize = 128;

/// Maximum display name length.
pub const MAX_DISPLAY_NAME_LEN: usize = 256;

/// Path segment used by the registration route; never a valid id.
const RESERVED_PROBE_ID: &str = "register";

/// Body of `POST /api/probe/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(alias = "franchise_id")]
    pub probe_id: String,
    #[serde(alias = "name", alias = "franchise_name")]
    pub display_name: String,
}

/// Body of `POST /api/probe/{id}/logs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogUpload {
    /// Agent clock at upload time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// The transmitted tail, newline separated.
    pub lines: String,
    /// Lines available in the agent's log file.
    pub total_lines: u64,
    /// Lines included in `lines`.
    pub sent_lines: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

/// Check a probe id: 1-128 chars of `[A-Za-z0-9_.-]`, not a reserved route word.
pub fn validate_probe_id(probe_id: &str) -> Result<(), CollectorError> {
    static PROBE_ID_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = PROBE_ID_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("failed to compile probe id regex")
    });

    if probe_id.is_empty() {
        return Err(CollectorError::Validation("probe_id is empty".to_string()));
    }
    if probe_id.len() > MAX_PROBE_ID_LEN {
        return Err(CollectorError::Validation(format!(
            "probe_id exceeds {MAX_PROBE_ID_LEN} characters"
        )));
    }
    if !regex.is_match(probe_id) {
        return Err(CollectorError::Validation(format!(
            "probe_id '{probe_id}' contains characters outside [A-Za-z0-9_.-]"
        )));
    }
    if probe_id.eq_ignore_ascii_case(RESERVED_PROBE_ID) {
        return Err(CollectorError::Validation(format!(
            "probe_id '{probe_id}' is reserved"
        )));
    }
    Ok(())
}

/// Trim a display name and check it is non-empty and bounded.
pub fn normalize_display_name(display_name: &str) -> Result<String, CollectorError> {
    let name = display_name.trim();
    if name.is_empty() {
        return Err(CollectorError::Validation(
            "display_name is empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(CollectorError::Validation(format!(
            "display_name exceeds {MAX_DISPLAY_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

/// Decode a JSON request body, mapping any failure to a validation error.
pub fn parse_body<T: DeserializeOwned>(body: &[u8], what: &str) -> Result<T, CollectorError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(CollectorError::Validation(format!("{what} body is empty")));
    }
    serde_json::from_slice(body)
        .map_err(|e| CollectorError::Validation(format!("invalid {what}: {e}")))
}

/// Decode and check an uploaded report.
pub fn parse_report(body: &[u8]) -> Result<ReportSnapshot, CollectorError> {
    let report: ReportSnapshot = parse_body(body, "report")?;

    if let Some(latency) = report.wan_latency_ms
        && !(latency.is_finite() && latency >= 0.0)
    {
        return Err(CollectorError::Validation(format!(
            "wan_latency_ms must be a non-negative number, got {latency}"
        )));
    }
    if !(report.scan_duration_seconds.is_finite() && report.scan_duration_seconds >= 0.0) {
        return Err(CollectorError::Validation(
            "scan_duration_seconds must be non-negative".to_string(),
        ));
    }
    Ok(report)
}

/// Decode and check a log upload.
pub fn parse_log_upload(body: &[u8]) -> Result<LogUpload, CollectorError> {
    let upload: LogUpload = parse_body(body, "log upload")?;
    if upload.sent_lines > upload.total_lines {
        return Err(CollectorError::Validation(format!(
            "sent_lines ({}) exceeds total_lines ({})",
            upload.sent_lines, upload.total_lines
        )));
    }
    Ok(upload)
}
