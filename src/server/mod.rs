// src/server/mod.rs

use crate::config::Config;
use crate::imap::ImapConnector;
use crate::pool::{ReaperTask, SessionPool};
use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;

mod metrics_server;
mod routes;

pub use routes::AppState;

/// The main server startup function: builds the connector and the session
/// pool, spawns the background tasks, and serves HTTP until shutdown.
pub async fn run(config: Config) -> Result<()> {
    let connector = Arc::new(ImapConnector::new(&config.imap, config.session.dial_timeout));
    let pool = Arc::new(SessionPool::new(connector.clone(), config.session.clone()));
    info!(
        "Upstream IMAP server: {}:{} ({:?}).",
        config.imap.host, config.imap.port, config.imap.mode
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut background_tasks: JoinSet<Result<()>> = JoinSet::new();

    // --- Session Reaper ---
    let reaper = ReaperTask::new(pool.clone());
    let shutdown_rx_reaper = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        reaper.run(shutdown_rx_reaper).await;
        Ok(())
    });

    // --- Metrics Server ---
    if config.metrics.enabled {
        let metrics_pool = pool.clone();
        let port = config.metrics.port;
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_pool, port, shutdown_rx_metrics).await;
            Ok(())
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    // --- HTTP Front End ---
    let app = routes::router(AppState {
        pool: pool.clone(),
        factory: connector,
    });

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(
        "Tidemail listening on http://{}:{}",
        config.host, config.port
    );

    let shutdown_tx_serve = shutdown_tx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received.");
            let _ = shutdown_tx_serve.send(());
        })
        .await?;

    // All sessions die with the process anyway; an explicit LOGOUT sweep
    // lets the mail server tear them down cleanly.
    pool.shutdown().await;
    background_tasks.shutdown().await;
    info!("Server shut down cleanly.");
    Ok(())
}
