//! Mailrun Worker - runs a single campaign without the HTTP API.
//!
//! Starts the campaign described by `CAMPAIGN_FILE`, or resumes the paused
//! campaign named by `RESUME_CAMPAIGN_ID`, and waits for it to finish. On
//! SIGINT/SIGTERM the campaign is paused and checkpointed, so a later run
//! with `RESUME_CAMPAIGN_ID` continues where this one stopped.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mailrun::dispatch::{DispatchEvent, ProgressObserver, StartCampaign};
use mailrun::engine::build_manager;
use mailrun::Config;

/// Logs batch boundaries and rate-limit waits.
struct LogObserver;

impl ProgressObserver for LogObserver {
    fn on_event(&self, event: &DispatchEvent) {
        match event {
            DispatchEvent::Progress(view) => debug!(
                campaign_id = %view.campaign_id,
                current_index = view.current_index,
                total = view.total,
                message = %view.last_status_message,
                "campaign_progress"
            ),
            DispatchEvent::RateLimited {
                campaign_id,
                wait_ms,
                reason,
            } => info!(
                campaign_id = %campaign_id,
                wait_ms = wait_ms,
                reason = %reason,
                "campaign_rate_limited"
            ),
            DispatchEvent::BatchCompleted {
                campaign_id,
                current_index,
                total,
            } => info!(
                campaign_id = %campaign_id,
                current_index = current_index,
                total = total,
                "campaign_batch_completed"
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("worker_starting");

    // Load configuration from environment
    let config = Config::from_env();
    info!(
        checkpoint_dir = %config.checkpoint_dir.display(),
        transport_url_set = config.transport_url.is_some(),
        simulate_emails = config.simulate_emails,
        rate_limit_enabled = config.rate_limits.enabled,
        pacing_delay_ms = config.pacing_delay_ms,
        "config_loaded"
    );

    let manager = build_manager(&config, Some(Arc::new(LogObserver))).await?;
    manager
        .recover_interrupted()
        .await
        .context("Failed to recover interrupted campaigns")?;

    let started = if let Some(campaign_id) = &config.resume_campaign_id {
        manager
            .resume(campaign_id)
            .await
            .with_context(|| format!("Failed to resume campaign {campaign_id}"))?
    } else if let Some(path) = &config.campaign_file {
        let request = load_campaign(path).await?;
        manager.start(request).await.context("Failed to start campaign")?
    } else {
        bail!("Set CAMPAIGN_FILE to start a campaign or RESUME_CAMPAIGN_ID to resume one");
    };

    let campaign_id = started.campaign_id;
    info!(
        campaign_id = %campaign_id,
        current_index = started.current_index,
        total = started.total,
        "worker_campaign_running"
    );

    tokio::select! {
        finished = manager.wait(&campaign_id) => {
            let view = finished?;
            info!(
                campaign_id = %campaign_id,
                status = %view.status,
                success = view.success_count,
                failed = view.failed_count,
                total = view.total,
                "worker_campaign_finished"
            );
        }
        _ = shutdown_signal() => {
            let view = manager.pause(&campaign_id).await?;
            info!(
                campaign_id = %campaign_id,
                status = %view.status,
                current_index = view.current_index,
                total = view.total,
                "worker_campaign_paused"
            );
        }
    }

    Ok(())
}

async fn load_campaign(path: &Path) -> Result<StartCampaign> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read campaign file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse campaign file {}", path.display()))
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
}
