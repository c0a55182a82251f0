//! Probe agent configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::expand_targets;
use crate::collector::validate_probe_id;

use super::validation::{ConfigError, expand_env_vars, read_yaml, require_nonzero};

/// Default timeout for collector calls (10 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for report uploads (30 seconds).
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Default scan interval (1 hour).
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(3600);

/// Default number of log lines uploaded per cycle.
pub const DEFAULT_TAIL_LINES: usize = 500;

/// Ports probed when none are configured.
pub const DEFAULT_PORTS: [u16; 5] = [22, 80, 443, 3389, 8080];

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_upload_timeout() -> Duration {
    DEFAULT_UPLOAD_TIMEOUT
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_scan_interval() -> Duration {
    DEFAULT_SCAN_INTERVAL
}

fn default_ports() -> Vec<u16> {
    DEFAULT_PORTS.to_vec()
}

fn default_concurrency() -> usize {
    64
}

fn default_wan_target() -> Option<String> {
    Some("8.8.8.8:53".to_string())
}

fn default_wan_samples() -> u32 {
    4
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file_prefix() -> String {
    "fleetwatch-agent.log".to_string()
}

fn default_tail_lines() -> usize {
    DEFAULT_TAIL_LINES
}

/// Identity this agent reports under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeIdentity {
    /// Stable probe id.
    pub id: String,
    /// Human-readable site name.
    pub name: String,
}

/// Where and how to reach the collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorEndpoint {
    /// Base URL, e.g. `http://collector:8080`. `${VAR:-default}` is expanded.
    pub url: String,

    /// Timeout for register, heartbeat and log calls (default: 10s).
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Timeout for report uploads (default: 30s).
    #[serde(default = "default_upload_timeout", with = "humantime_serde")]
    pub upload_timeout: Duration,
}

/// Local network scan settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// IPv4 addresses or CIDR blocks.
    #[serde(default)]
    pub targets: Vec<String>,

    /// TCP ports probed on every host.
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,

    /// Per-connection timeout (default: 1s).
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Maximum connection attempts in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// `host:port` used for WAN latency; `null` disables the measurement.
    #[serde(default = "default_wan_target")]
    pub wan_target: Option<String>,

    /// Connect round-trips averaged per measurement.
    #[serde(default = "default_wan_samples")]
    pub wan_samples: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            ports: default_ports(),
            connect_timeout: default_connect_timeout(),
            concurrency: default_concurrency(),
            wan_target: default_wan_target(),
            wan_samples: default_wan_samples(),
        }
    }
}

/// Cycle timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Time between cycles (default: 1h).
    #[serde(default = "default_scan_interval", with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SCAN_INTERVAL,
        }
    }
}

/// Agent-side logging. The rotated file doubles as the source of log uploads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,

    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// File name prefix; the appender adds a date suffix.
    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,

    /// Lines uploaded per cycle.
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            level: default_log_level(),
            file_prefix: default_log_file_prefix(),
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub probe: ProbeIdentity,
    pub collector: CollectorEndpoint,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AgentConfig {
    /// Load configuration from a YAML file, expanding env vars in the collector URL.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config: Self = read_yaml(path)?;
        config.collector.url = expand_env_vars(&config.collector.url);
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_probe_id(&self.probe.id)
            .map_err(|e| ConfigError::ValidationError(format!("probe id: {e}")))?;
        if self.probe.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "probe name must not be empty".to_string(),
            ));
        }

        let url = url::Url::parse(&self.collector.url).map_err(|e| {
            ConfigError::ValidationError(format!(
                "invalid collector url '{}': {e}",
                self.collector.url
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "collector url must be http or https, got '{}'",
                url.scheme()
            )));
        }
        require_nonzero("collector timeout", self.collector.timeout)?;
        require_nonzero("collector upload_timeout", self.collector.upload_timeout)?;

        if self.scan.ports.is_empty() || self.scan.ports.contains(&0) {
            return Err(ConfigError::ValidationError(
                "scan ports must be a non-empty list of non-zero ports".to_string(),
            ));
        }
        if self.scan.concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "scan concurrency must be positive".to_string(),
            ));
        }
        require_nonzero("scan connect_timeout", self.scan.connect_timeout)?;
        expand_targets(&self.scan.targets)
            .map_err(|e| ConfigError::ValidationError(format!("scan targets: {e}")))?;

        require_nonzero("schedule interval", self.schedule.interval)?;

        if self.logging.tail_lines == 0 {
            return Err(ConfigError::ValidationError(
                "logging tail_lines must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
