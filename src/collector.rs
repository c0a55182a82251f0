//! Collector Layer
//!
//! Probe lifecycle and report ingestion. The [`Collector`] validates inbound
//! calls, serializes writes per probe id and delegates to the storage traits.
//!
//! # Components
//!
//! - [`Collector`]: Register, heartbeat, report and log uploads, plus read views
//! - [`ProbeLocks`]: Per-probe async mutexes
//! - [`Clock`]: Injected time source ([`SystemClock`], [`ManualClock`])
//! - [`ProbeView`] / [`FleetStatistics`] / [`ServiceStatus`]: Read-side shapes
//!
//! # Example
//!
//! ```rust,no_run
//! use fleetwatch::{Collector, CollectorSettings, StorageBuilder};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let handles = StorageBuilder::memory().build().await?;
//! let collector = Collector::from_handles(&handles, CollectorSettings::default());
//! collector.register_probe("nw7", "Example FC").await?;
//! # Ok(())
//! # }
//! ```

mod clock;
mod error;
mod locks;
mod service;
mod validation;
mod views;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::CollectorError;
pub use locks::{ProbeLockGuard, ProbeLocks};
pub use service::{
    Collector, CollectorSettings, DEFAULT_HISTORY_LIMIT, DEFAULT_LIVENESS_WINDOW,
    MAX_HISTORY_LIMIT,
};
pub use validation::{
    LogUpload, RegisterRequest, parse_body, parse_log_upload, parse_report, validate_probe_id,
};
pub use views::{FleetStatistics, ProbeView, ReportDigest, ServiceStatus, UploadAck};
