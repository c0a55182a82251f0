//! Tracing setup for both binaries.
//!
//! The collector logs to stdout only. The agent also writes a daily-rotated
//! file under its configured log directory; that file is what the agent tails
//! and uploads every cycle.

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Default filter for the collector when `RUST_LOG` is unset.
pub const COLLECTOR_DEFAULT_FILTER: &str = "info,fleetwatch=debug";

/// Initialize stdout logging for the collector.
pub fn init_collector() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| COLLECTOR_DEFAULT_FILTER.into()),
        )
        .with(fmt::layer())
        .init();
}

/// Initialize stdout and rotating file logging for the agent.
///
/// # Errors
/// Returns an I/O error if the log directory cannot be created.
pub fn init_agent(config: &LoggingConfig) -> std::io::Result<LoggingGuard> {
    std::fs::create_dir_all(&config.dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &config.dir, &config.file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    tracing::info!(
        log_dir = %config.dir.display(),
        level = %config.level,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Keeps the non-blocking file writer alive. Dropping it flushes pending lines.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

impl std::fmt::Debug for LoggingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingGuard").finish_non_exhaustive()
    }
}
