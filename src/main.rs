//! fleetwatch Collector Entry Point
//!
//! Runs the collector service: storage, probe lifecycle and the REST API.
//! Core functionality is provided by the `fleetwatch` library crate.

use clap::Parser;
use fleetwatch::{
    Collector,
    config::{AppConfig, parse_duration},
    logging,
    server::{AppState, create_router},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// fleetwatch - Probe Fleet Collector
#[derive(Parser, Debug)]
#[command(name = "fleetwatch", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/collector.yaml",
        env = "FLEETWATCH_CONFIG"
    )]
    config: String,

    /// Server bind address (overrides config file)
    #[arg(long, env = "FLEETWATCH_SERVER_BIND")]
    server_bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, env = "FLEETWATCH_SERVER_PORT")]
    server_port: Option<u16>,

    /// Database DSN (overrides config file)
    #[arg(long, env = "FLEETWATCH_DB_URL")]
    db_url: Option<String>,

    /// Silence before a probe counts as disconnected, e.g. `10m` (overrides config file)
    #[arg(long, env = "FLEETWATCH_LIVENESS_WINDOW", value_parser = parse_duration)]
    liveness_window: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_collector();

    tracing::info!("fleetwatch - Probe Fleet Collector");

    let cli = Cli::parse();

    tracing::info!(path = %cli.config, "Loading configuration");
    let mut config = AppConfig::load(&cli.config)?;

    // CLI > ENV > config file
    if let Some(bind) = cli.server_bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.server_port {
        config.server.port = port;
    }
    if let Some(dsn) = cli.db_url {
        config.database.dsn = dsn;
    }
    if let Some(window) = cli.liveness_window {
        config.probes.liveness_window = window;
    }
    config.validate()?;

    tracing::info!(
        bind = %config.server.bind,
        port = config.server.port,
        driver = %config.database.driver,
        dsn = %config.database.dsn,
        liveness_window = ?config.probes.liveness_window,
        auto_register = config.probes.auto_register,
        "Configuration loaded"
    );

    let handles = config.database.storage_builder().build().await?;
    tracing::info!(durable = handles.is_durable(), "Storage initialized");

    let collector = Arc::new(Collector::from_handles(
        &handles,
        config.collector_settings(),
    ));
    let app = create_router(AppState { collector });

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Collector listening on: http://{}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down storage...");
    handles.shutdown().await;

    tracing::info!("Shutdown complete");
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
