//! config-relay: configuration server with live-refresh fanout.
//!
//! # Architecture Overview
//!
//! ```text
//!   SCM push ──▶ POST /monitor ──▶ notifier ──▶ bus ══ /bus/subscribe ══▶ agents
//!                                                                          │
//!   git / dir ◀── store ◀── cache ◀── server ◀── GET /{app}/{profile}/{label} ◀┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use config_relay::config::loader::{load_config, load_from_env};
use config_relay::lifecycle::signals::shutdown_signal;
use config_relay::observability::{logging, metrics};
use config_relay::App;

#[derive(Parser)]
#[command(name = "config-relay", version)]
#[command(about = "Configuration server with live-refresh fanout", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Without it, defaults plus
    /// CONFIG_RELAY_* environment variables are used.
    #[arg(short, long, env = "CONFIG_RELAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };
    logging::init_logging(&config.observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "config-relay starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        repository = %config.repository.uri,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let tls = config.listener.tls.is_some();
    let bind_address = config.listener.bind_address.clone();
    let app = App::build(config)?;

    if tls {
        app.run_tls(shutdown_signal()).await?;
    } else {
        let listener = TcpListener::bind(&bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Listening for connections");
        app.run(listener, shutdown_signal()).await?;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
