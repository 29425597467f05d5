//! Campaign control endpoint handlers.
//!
//! Handlers translate HTTP into [`CampaignManager`] calls and map
//! [`CampaignError`] onto status codes:
//! - 404 unknown campaign id
//! - 409 a loop is already active for the id
//! - 422 invalid campaign or lifecycle transition
//! - 500 persistence failures

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::campaign::RateLimitConfig;
use crate::dispatch::{CampaignManager, StartCampaign};
use crate::error::CampaignError;
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: Arc<CampaignManager>,
}

impl AppState {
    pub fn new(config: Config, manager: Arc<CampaignManager>) -> Self {
        Self {
            config: Arc::new(config),
            manager,
        }
    }
}

/// Body of every non-2xx answer.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

fn error_response(err: CampaignError) -> Response {
    let (code, status) = match &err {
        CampaignError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        CampaignError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        CampaignError::InvalidTransition { .. } | CampaignError::InvalidCampaign(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "invalid")
        }
        CampaignError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "error"),
    };

    if code.is_server_error() {
        error!(error = %err, "campaign_request_failed");
    } else {
        warn!(error = %err, status_code = code.as_u16(), "campaign_request_rejected");
    }

    (
        code,
        Json(ErrorResponse {
            status,
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn respond<T: Serialize>(code: StatusCode, result: Result<T, CampaignError>) -> Response {
    match result {
        Ok(body) => (code, Json(body)).into_response(),
        Err(e) => error_response(e),
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_campaigns: usize,
    pub simulate_emails: bool,
    /// Caps every run enforces
    pub rate_limits: RateLimitConfig,
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_campaigns: state.manager.active_ids().await.len(),
        simulate_emails: state.config.simulate_emails || state.config.transport_url.is_none(),
        rate_limits: state.config.rate_limits,
    })
}

// =============================================================================
// Campaigns
// =============================================================================

/// `GET /campaigns`: newest-first history.
pub async fn list_campaigns(State(state): State<AppState>) -> Response {
    respond(StatusCode::OK, state.manager.history().await)
}

/// `POST /campaigns`: validate and start a new campaign.
pub async fn start_campaign(
    State(state): State<AppState>,
    Json(request): Json<StartCampaign>,
) -> Response {
    info!(
        recipients = request.recipients.len(),
        batch_size = request.policy.batch_size,
        "campaign_start_requested"
    );
    respond(StatusCode::ACCEPTED, state.manager.start(request).await)
}

/// `GET /campaigns/:id`
pub async fn get_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    respond(StatusCode::OK, state.manager.progress(&id).await)
}

/// `POST /campaigns/:id/pause`
pub async fn pause_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    respond(StatusCode::ACCEPTED, state.manager.pause(&id).await)
}

/// `POST /campaigns/:id/resume`
pub async fn resume_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    respond(StatusCode::ACCEPTED, state.manager.resume(&id).await)
}

/// `POST /campaigns/:id/cancel`
pub async fn cancel_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    respond(StatusCode::ACCEPTED, state.manager.cancel(&id).await)
}

/// `POST /campaigns/:id/restart`
pub async fn restart_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    respond(StatusCode::ACCEPTED, state.manager.restart(&id).await)
}

/// `DELETE /campaigns/:id`
pub async fn delete_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let result = state
        .manager
        .delete(&id)
        .await
        .map(|()| StatusResponse { status: "deleted" });
    respond(StatusCode::OK, result)
}

/// `DELETE /campaigns`
pub async fn clear_campaigns(State(state): State<AppState>) -> Response {
    let result = state
        .manager
        .clear()
        .await
        .map(|()| StatusResponse { status: "cleared" });
    respond(StatusCode::OK, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::{MessageTemplate, Recipient, SendingPolicy};
    use crate::checkpoint::{CheckpointStore, MemoryStore};
    use crate::clock::MonotonicClock;
    use crate::dispatch::{DispatchSettings, Dispatcher, ProgressBoard};
    use crate::render::TemplateRenderer;
    use crate::transport::SimulatedTransport;
    use std::path::PathBuf;
    use std::time::Duration;

    async fn state() -> AppState {
        let store = CheckpointStore::open(Arc::new(MemoryStore::new()))
            .await
            .unwrap();
        let board = Arc::new(ProgressBoard::new(None));
        let dispatcher = Dispatcher::new(
            Arc::new(TemplateRenderer),
            Arc::new(SimulatedTransport::new(Duration::ZERO, 0.0)),
            Arc::new(store),
            Arc::new(MonotonicClock::new()),
            board.clone(),
            DispatchSettings::default(),
        );
        let config = Config {
            port: 0,
            checkpoint_dir: PathBuf::from("unused"),
            transport_url: None,
            simulate_emails: true,
            simulate_failure_probability: 0.0,
            simulate_latency_ms: 0,
            sender_name: None,
            sender_address: None,
            rate_limits: RateLimitConfig {
                per_hour: 500,
                enabled: true,
                ..Default::default()
            },
            pacing_delay_ms: 1000,
            continuous_batch_pause_ms: 500,
            checkpoint_every: 5,
            request_timeout_ms: 15000,
            campaign_file: None,
            resume_campaign_id: None,
        };
        AppState::new(
            config,
            Arc::new(CampaignManager::new(Arc::new(dispatcher), board)),
        )
    }

    fn request(total: usize) -> StartCampaign {
        StartCampaign {
            template: MessageTemplate {
                subject: "Hi".to_string(),
                text_body: "Hello {{firstName}}".to_string(),
                ..Default::default()
            },
            recipients: (0..total)
                .map(|i| Recipient::new(format!("r{i}@example.com")))
                .collect(),
            policy: SendingPolicy::default(),
        }
    }

    #[tokio::test]
    async fn test_health_reports_configuration() {
        let Json(body) = health(State(state().await)).await;
        assert_eq!(body.status, "ok");
        assert_eq!(body.active_campaigns, 0);
        assert!(body.simulate_emails);
        assert_eq!(body.rate_limits.per_hour, 500);
        assert!(body.rate_limits.enabled);
    }

    #[tokio::test]
    async fn test_unknown_campaign_is_404() {
        let state = state().await;
        let resp = get_campaign(State(state.clone()), Path("send-nope".to_string())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = pause_campaign(State(state), Path("send-nope".to_string())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_campaign_is_422() {
        let resp = start_campaign(State(state().await), Json(request(0))).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_then_resume_conflicts() {
        let state = state().await;
        let resp = start_campaign(State(state.clone()), Json(request(3))).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let id = state.manager.active_ids().await.remove(0);
        let resp = resume_campaign(State(state.clone()), Path(id.clone())).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = cancel_campaign(State(state.clone()), Path(id.clone())).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let resp = cancel_campaign(State(state.clone()), Path(id.clone())).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = delete_campaign(State(state.clone()), Path(id)).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = list_campaigns(State(state)).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn test_error_mapping() {
        let resp = error_response(CampaignError::Conflict("send-1".to_string()));
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let resp = error_response(CampaignError::Persistence(
            std::io::Error::other("disk full").into(),
        ));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
