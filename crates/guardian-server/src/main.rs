//! # guardian-server
//!
//! HTTP server for the guardian separation alarm.
//!
//! This binary provides:
//! - The separation monitor loop (signal classification, grace countdown, alarm)
//! - Emergency notifications with retry through the messaging relay
//! - REST API for status, acknowledgement, sample ingest and configuration
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! GUARDIAN_CONFIG=./config.toml cargo run --package guardian-server
//!
//! # Production
//! GUARDIAN_ENV=production ./guardian-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use anyhow::Context;
use guardian_core::config::DEFAULT_CONFIG_PATH;
use guardian_core::Config;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use guardian_server::{api, logging, service};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::is_production())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting guardian-server");

    let config_path =
        std::env::var("GUARDIAN_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("failed to load configuration from {config_path}"))?;
    info!(path = %config_path, "Configuration loaded");

    let bind_address = config.server.bind_address.clone();
    let settings = service::open_settings(&config);
    let channel = service::delivery_channel(&config)?;
    let alert = service::alert_sink(&config);
    let service::Service { state, monitor } =
        service::start(config, settings, channel, alert).await?;

    let app = api::create_router(state.clone());
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    info!(address = %bind_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped; shutting down monitor");
    if let Err(e) = state.guardian().shutdown().await {
        warn!(error = %e, "Monitor was already stopped");
    }
    if let Err(e) = monitor.await {
        error!(error = %e, "Monitor task ended abnormally");
    }

    info!("guardian-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
