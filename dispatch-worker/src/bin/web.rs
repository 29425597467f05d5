//! Mailrun control API server.
//!
//! Exposes campaign start/pause/resume/cancel/restart over HTTP. Campaigns
//! left Running by a previous process are turned into Paused ones at startup,
//! and every running campaign is paused (and checkpointed) on shutdown.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mailrun::engine::build_manager;
use mailrun::web::{router, AppState};
use mailrun::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        checkpoint_dir = %config.checkpoint_dir.display(),
        transport_url_set = config.transport_url.is_some(),
        simulate_emails = config.simulate_emails,
        rate_limit_enabled = config.rate_limits.enabled,
        "config_loaded"
    );

    let manager = build_manager(&config, None).await?;

    let recovered = manager
        .recover_interrupted()
        .await
        .context("Failed to recover interrupted campaigns")?;
    info!(recovered = recovered.len(), "interrupted_campaigns_recovered");

    // Create application state and router
    let state = AppState::new(config.clone(), manager.clone());
    let app = router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let paused = manager.pause_all().await;
    info!(paused = paused.len(), "running_campaigns_paused");

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
