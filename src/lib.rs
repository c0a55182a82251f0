//! fleetwatch - Probe Fleet Collector
//!
//! Tracks a fleet of remote network probes. Each probe registers, sends
//! heartbeats and uploads scan reports and log tails; the collector keeps the
//! latest state per probe and derives fleet-wide statistics.
//!
//! The crate ships two binaries: `fleetwatch` (the collector service) and
//! `fleetwatch-agent` (the probe agent).
//!
//! # Architecture
//!
//! - **Storage**: Registry, report and log stores behind async traits, backed by SQLite or memory
//! - **Collector**: Probe lifecycle, report ingestion and statistics
//! - **Server**: axum REST API over the collector
//! - **Agent**: Scan, heartbeat and upload loop run at each site
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fleetwatch::{Collector, CollectorSettings, StorageBuilder};
//! use fleetwatch::server::{AppState, create_router};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let handles = StorageBuilder::sqlite("sqlite://data/fleetwatch.db?mode=rwc")
//!     .build()
//!     .await?;
//! let collector = Arc::new(Collector::from_handles(&handles, CollectorSettings::default()));
//! let app = create_router(AppState { collector });
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod collector;
pub mod config;
pub mod logging;
pub mod server;
pub mod storage;

pub use agent::{AgentError, HttpCollectorClient, ProbeAgent};
pub use collector::{Collector, CollectorError, CollectorSettings};
pub use config::{AgentConfig, AppConfig, ConfigError};
pub use storage::{StorageBackend, StorageBuilder, StorageError, StorageHandles};
