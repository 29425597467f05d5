//! Wiring of the engine from a [`Config`], shared by both binaries.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::checkpoint::{CheckpointStore, FileStore};
use crate::clock::MonotonicClock;
use crate::dispatch::{CampaignManager, Dispatcher, ProgressBoard, ProgressObserver};
use crate::render::TemplateRenderer;
use crate::transport::{HttpTransport, SimulatedTransport, TransportClient};
use crate::Config;

/// Pick the transport the configuration asks for.
///
/// Without a `TRANSPORT_URL` delivery is simulated.
pub fn build_transport(config: &Config) -> Result<Arc<dyn TransportClient>> {
    let endpoint = match (&config.transport_url, config.simulate_emails) {
        (Some(endpoint), false) => endpoint.clone(),
        (endpoint, _) => {
            if endpoint.is_none() && !config.simulate_emails {
                warn!("transport_url_missing_using_simulation");
            }
            info!(
                latency_ms = config.simulate_latency_ms,
                failure_probability = config.simulate_failure_probability,
                "transport_simulated"
            );
            return Ok(Arc::new(SimulatedTransport::new(
                Duration::from_millis(config.simulate_latency_ms),
                config.simulate_failure_probability,
            )));
        }
    };

    info!(endpoint = %endpoint, "transport_http");
    let transport = HttpTransport::new(endpoint, config.request_timeout())?;
    Ok(Arc::new(transport))
}

/// Open the checkpoint store and assemble a ready [`CampaignManager`].
///
/// `forward` receives every dispatch event after the progress board.
pub async fn build_manager(
    config: &Config,
    forward: Option<Arc<dyn ProgressObserver>>,
) -> Result<Arc<CampaignManager>> {
    let transport = build_transport(config)?;

    let backend = FileStore::new(&config.checkpoint_dir);
    let store = CheckpointStore::open(Arc::new(backend))
        .await
        .with_context(|| {
            format!(
                "Failed to open checkpoint store in {}",
                config.checkpoint_dir.display()
            )
        })?;

    let board = Arc::new(ProgressBoard::new(forward));
    let dispatcher = Dispatcher::new(
        Arc::new(TemplateRenderer::new()),
        transport,
        Arc::new(store),
        Arc::new(MonotonicClock::new()),
        board.clone(),
        config.dispatch_settings(),
    );

    Ok(Arc::new(CampaignManager::new(Arc::new(dispatcher), board)))
}
