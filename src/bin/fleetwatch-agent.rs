//! fleetwatch Probe Agent Entry Point
//!
//! Registers with the collector, then scans and uploads every interval until
//! Ctrl+C or SIGTERM.

use clap::Parser;
use std::time::Duration;

use fleetwatch::{
    ProbeAgent,
    config::{AgentConfig, parse_duration},
    logging,
};
use tokio::sync::watch;

/// fleetwatch-agent - Probe Agent
#[derive(Parser, Debug)]
#[command(name = "fleetwatch-agent", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/agent.yaml",
        env = "FLEETWATCH_AGENT_CONFIG"
    )]
    config: String,

    /// Collector base URL (overrides config file)
    #[arg(long, env = "FLEETWATCH_COLLECTOR_URL")]
    collector_url: Option<String>,

    /// Time between cycles, e.g. `15m` (overrides config file)
    #[arg(long, env = "FLEETWATCH_AGENT_INTERVAL", value_parser = parse_duration)]
    interval: Option<Duration>,

    /// Register, run a single cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = AgentConfig::load(&cli.config)?;
    if let Some(url) = cli.collector_url {
        config.collector.url = url;
    }
    if let Some(interval) = cli.interval {
        config.schedule.interval = interval;
    }
    config.validate()?;

    // Keep the guard alive so buffered file lines are flushed on exit.
    let _log_guard = logging::init_agent(&config.logging)?;

    tracing::info!(
        probe_id = %config.probe.id,
        collector = %config.collector.url,
        interval = ?config.schedule.interval,
        targets = ?config.scan.targets,
        "fleetwatch-agent starting"
    );

    let mut agent = ProbeAgent::from_config(&config)?;

    if cli.once {
        let cycle = agent.run_once().await;
        tracing::info!(clean = cycle.is_clean(), outcome = ?cycle, "Single cycle complete");
        return Ok(());
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    agent.run(stop_rx).await;

    tracing::info!("Agent stopped");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
