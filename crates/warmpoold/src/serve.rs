//! The `serve` command: open the store, wire services, run until Ctrl-C.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use warmpool_state::StateStore;

use crate::config::DaemonConfig;
use crate::services::Services;

pub async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    config.validate()?;
    info!(listen = %config.server.listen, "WarmPool daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    std::fs::create_dir_all(&config.store.data_dir)?;
    let db_path = config.store.db_path();
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let services = Services::build(&store, &config);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let metrics_handle = if services.prebuilds_enabled {
        let metrics = Arc::clone(&services.metrics);
        let interval = config.prebuilds.metrics_interval();
        let timeout = config.prebuilds.metrics_timeout();
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            metrics.background_fetch(interval, timeout, shutdown).await;
        }))
    } else {
        info!("prebuilds disabled, metrics refresher not started");
        None
    };

    // ── Start API server ───────────────────────────────────────

    let router = warmpool_api::build_router(services.api_state());
    let listener = tokio::net::TcpListener::bind(config.server.listen).await?;
    info!(addr = %config.server.listen, "API server starting");

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C, shutting down");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    if let Some(handle) = metrics_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "metrics refresher task failed");
        }
    }

    info!("WarmPool daemon stopped");
    Ok(())
}
