//! Collector service configuration.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::collector::{CollectorSettings, DEFAULT_LIVENESS_WINDOW};
use crate::storage::db::DEFAULT_MAX_CONNECTIONS;
use crate::storage::{StorageBackend, StorageBuilder};

use super::validation::{ConfigError, expand_env_vars, read_yaml, require_nonzero};

/// Default SQLite location.
pub const DEFAULT_DSN: &str = "data/fleetwatch.db";

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_liveness_window() -> Duration {
    DEFAULT_LIVENESS_WINDOW
}

fn default_auto_register() -> bool {
    true
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 8080).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Storage backend selector.
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
pub enum DatabaseDriver {
    #[default]
    Sqlite,
    Memory,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Backend (default: sqlite).
    #[serde(default)]
    pub driver: DatabaseDriver,

    /// SQLite file path or `sqlite:` URL. `${VAR:-default}` is expanded.
    #[serde(default = "default_dsn")]
    pub dsn: String,

    /// Connection pool size (default: 5).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_dsn() -> String {
    DEFAULT_DSN.to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::Sqlite,
            dsn: default_dsn(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl DatabaseConfig {
    /// sqlx connection URL for the configured DSN.
    ///
    /// Bare paths become `sqlite://<path>?mode=rwc`; explicit URLs pass through.
    pub fn connection_url(&self) -> String {
        let dsn = expand_env_vars(&self.dsn);
        if dsn.starts_with("sqlite:") {
            dsn
        } else {
            format!("sqlite://{dsn}?mode=rwc")
        }
    }

    /// Storage builder for the configured backend.
    pub fn storage_builder(&self) -> StorageBuilder {
        let backend = match self.driver {
            DatabaseDriver::Memory => StorageBackend::Memory,
            DatabaseDriver::Sqlite => StorageBackend::Sqlite {
                url: self.connection_url(),
            },
        };
        StorageBuilder::new(backend).max_connections(self.max_connections)
    }
}

// =============================================================================
// Probe Policy Configuration
// =============================================================================

/// Probe lifecycle policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbesConfig {
    /// Maximum silence before a probe is disconnected (default: 5m).
    #[serde(default = "default_liveness_window", with = "humantime_serde")]
    pub liveness_window: Duration,

    /// Create records for unknown probes on first contact (default: true).
    #[serde(default = "default_auto_register")]
    pub auto_register: bool,
}

impl Default for ProbesConfig {
    fn default() -> Self {
        Self {
            liveness_window: DEFAULT_LIVENESS_WINDOW,
            auto_register: true,
        }
    }
}

impl From<&ProbesConfig> for CollectorSettings {
    fn from(config: &ProbesConfig) -> Self {
        Self {
            liveness_window: config.liveness_window,
            auto_register: config.auto_register,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level collector configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Web server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Probe lifecycle policy.
    #[serde(default)]
    pub probes: ProbesConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = read_yaml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate server bind address
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::ValidationError(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;

        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server port must be non-zero".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database max_connections must be positive".to_string(),
            ));
        }

        if self.database.driver == DatabaseDriver::Sqlite && self.database.dsn.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "database dsn is required for the sqlite driver".to_string(),
            ));
        }

        require_nonzero("probes liveness_window", self.probes.liveness_window)?;

        Ok(())
    }

    /// Collector settings derived from the probe policy.
    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings::from(&self.probes)
    }
}
