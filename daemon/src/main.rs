// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # AEGIS Isolator daemon
//!
//! Runs the container isolation engine behind an HTTP/WebSocket API:
//!
//! - builds the isolator from CLI flags / environment variables
//! - `initialize()` at startup (Docker ping, network, default image,
//!   registry reconciliation)
//! - background reaper deleting sandboxes idle past their timeout
//! - graceful shutdown on Ctrl+C/SIGTERM, draining every tracked sandbox

use aegis_isolator_core::domain::config::IsolatorConfig;
use aegis_isolator_core::presentation::api;
use aegis_isolator_core::Isolator;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// AEGIS Isolator - secure container isolation for agent execution
#[derive(Parser)]
#[command(name = "aegis-isolatord")]
#[command(version, about, long_about = None)]
struct Cli {
    /// HTTP API host
    #[arg(long, env = "ISOLATOR_HOST", default_value = "0.0.0.0")]
    host: String,

    /// HTTP API port
    #[arg(long, env = "ISOLATOR_PORT", default_value = "8001")]
    port: u16,

    /// Host directory holding per-workspace directories
    #[arg(long, env = "WORKSPACE_DIR", default_value = "/var/lib/aegis/workspaces")]
    workspace_dir: PathBuf,

    /// Default sandbox image
    #[arg(long, env = "ISOLATOR_DEFAULT_IMAGE", default_value = "python:3.11-slim")]
    default_image: String,

    /// Name of the isolation network
    #[arg(long, env = "ISOLATOR_NETWORK", default_value = "aegis-isolator")]
    network: String,

    /// Custom Docker socket path (auto-detect when unset)
    #[arg(long, env = "DOCKER_SOCKET")]
    docker_socket: Option<String>,

    /// Seconds between idle-reaper scans
    #[arg(long, env = "ISOLATOR_REAP_INTERVAL", default_value = "60")]
    reap_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "ISOLATOR_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = IsolatorConfig {
        workspace_root: cli.workspace_dir,
        default_image: cli.default_image,
        network_name: cli.network,
        docker_socket: cli.docker_socket,
        reap_interval_seconds: cli.reap_interval,
    };

    let isolator =
        Arc::new(Isolator::connect(config.clone()).context("Failed to construct isolator")?);
    isolator
        .initialize()
        .await
        .context("Failed to initialize isolator")?;

    let shutdown = CancellationToken::new();
    let reaper = tokio::spawn(reap_loop(
        isolator.clone(),
        Duration::from_secs(config.reap_interval_seconds),
        shutdown.clone(),
    ));

    let app = api::app(isolator.clone());
    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Isolator listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    shutdown.cancel();
    let _ = reaper.await;

    isolator.cleanup().await;
    info!("Isolator shut down");
    Ok(())
}

/// Periodically delete sandboxes idle past their timeout.
async fn reap_loop(isolator: Arc<Isolator>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let reaped = isolator.reap_idle().await;
                if !reaped.is_empty() {
                    info!(count = reaped.len(), "Reaped idle containers");
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
