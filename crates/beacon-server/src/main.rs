//! # beacon-server
//!
//! HTTP server for the beacon device presence tracker.
//!
//! This binary provides:
//! - REST API for devices, geofences, location samples and sync
//! - Periodic presence evaluation and background sync delivery
//! - Snapshot persistence across restarts
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package beacon-server -- --config beacon.toml
//!
//! # In memory, with simulated scans
//! cargo run --package beacon-server --features mock-scan -- --ephemeral
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::sync::Arc;

use anyhow::Context;
use beacon_core::{BeaconConfig, LocationSampler, Storage};
use beacon_server::api::create_router;
use beacon_server::cli::Cli;
use beacon_server::logging::{self, LogSettings};
use beacon_server::state::AppState;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _log_guard = logging::init(&LogSettings::from_env())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting beacon-server");

    let config_path = cli.config_path();
    info!(path = %config_path.display(), "Loading configuration");
    let config =
        BeaconConfig::load(Some(&config_path)).context("Failed to load configuration")?;

    let storage = if cli.ephemeral {
        info!("Running without persistence");
        None
    } else {
        let storage = match &config.storage.data_dir {
            Some(dir) => Storage::new(dir),
            None => Storage::default_location()?,
        };
        info!(data_dir = %storage.data_dir().display(), "Using snapshot storage");
        Some(storage)
    };

    let state = Arc::new(AppState::new(config.clone(), storage)?);

    // Background work
    let sync_worker = state.engine.sync_queue().spawn_drain();
    let sampler = LocationSampler::start(
        state.engine.clone(),
        None,
        config.presence.sample_interval(),
    );
    #[cfg(feature = "mock-scan")]
    let scan_pump = beacon_core::ScanPump::start(
        state.engine.clone(),
        Box::new(beacon_core::MockScanSource::repeating(
            beacon_core::MockScanSource::demo_devices(),
            config.presence.sample_interval(),
        )),
    );

    // Bind to address
    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| {
            format!(
                "Failed to bind {}:{}",
                config.server.host, config.server.port
            )
        })?;

    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, create_router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    #[cfg(feature = "mock-scan")]
    scan_pump.stop().await;
    sampler.stop().await;
    sync_worker.shutdown().await;
    state.persist().await;

    let pending = state.engine.sync_queue().len();
    if pending > 0 {
        info!(pending, "Undelivered sync records discarded at shutdown");
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
