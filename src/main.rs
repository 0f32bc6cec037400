//! # livepoll
//!
//! Live classroom poll server binary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use livepoll_telemetry::{init_telemetry, TelemetryConfig};

/// Live poll server.
#[derive(Parser, Debug)]
#[command(name = "livepoll", about = "Live classroom poll server")]
struct Cli {
    /// JSON config file, merged over the defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides config and environment).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides config and environment).
    #[arg(long)]
    port: Option<u16>,

    /// Default log level; RUST_LOG takes precedence.
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,

    /// Log one JSON object per line.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let telemetry = init_telemetry(TelemetryConfig {
        log_level: cli.log_level,
        json: cli.log_json,
        ..Default::default()
    });

    let mut config = livepoll_server::load_config(cli.config.as_deref())
        .context("Failed to load server config")?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let handle = livepoll_server::start(config, &telemetry)
        .await
        .context("Failed to start server")?;
    tracing::info!(port = handle.port, "livepoll ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    handle.shutdown().await;
    Ok(())
}
