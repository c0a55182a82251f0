//! Probe Agent
//!
//! Runs at each site. Scans the local network, measures WAN latency and talks
//! to the collector on a fixed interval.
//!
//! # Components
//!
//! - [`ProbeAgent`]: The register-then-cycle loop with a `watch` stop signal
//! - [`CollectorApi`] / [`HttpCollectorClient`]: Collector uplink with bounded timeouts
//! - [`Scanner`] / [`TcpSweepScanner`]: TCP connect discovery over IPv4 targets
//! - [`LatencyProbe`] / [`TcpLatencyProbe`]: WAN round-trip measurement
//! - [`LogTail`]: Tail of the agent's own log file, uploaded every cycle
//!
//! A failing step is logged and the cycle moves on; nothing short of the stop
//! signal ends the loop.

mod client;
mod driver;
mod error;
mod log_tail;
mod scanner;

pub use client::{CollectorApi, HttpCollectorClient};
pub use driver::{CycleReport, ProbeAgent, StepOutcome};
pub use error::AgentError;
pub use log_tail::{LogExcerpt, LogTail};
pub use scanner::{
    LatencyProbe, MIN_CIDR_PREFIX, ScanResult, Scanner, TcpLatencyProbe, TcpSweepScanner,
    expand_targets,
};
