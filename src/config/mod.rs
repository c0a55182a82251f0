//! Configuration module for fleetwatch.
//!
//! Provides YAML-based configuration loading and validation for:
//! - The collector service: server, database backend, probe policy
//! - The probe agent: identity, collector endpoint, scan, schedule, logging

mod agent;
mod app;
mod validation;

pub use agent::{
    AgentConfig, CollectorEndpoint, DEFAULT_PORTS, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SCAN_INTERVAL,
    DEFAULT_TAIL_LINES, DEFAULT_UPLOAD_TIMEOUT, LoggingConfig, ProbeIdentity, ScanConfig,
    ScheduleConfig,
};
pub use app::{AppConfig, DEFAULT_DSN, DatabaseConfig, DatabaseDriver, ProbesConfig, ServerConfig};
pub use validation::{ConfigError, expand_env_vars, parse_duration};
