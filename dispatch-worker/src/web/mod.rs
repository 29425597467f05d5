//! HTTP control API for campaigns.

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{
    cancel_campaign, clear_campaigns, delete_campaign, get_campaign, health, list_campaigns,
    pause_campaign, restart_campaign, resume_campaign, start_campaign, AppState, ErrorResponse,
    HealthResponse, StatusResponse,
};

/// Build the router with every campaign route.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/campaigns",
            get(list_campaigns).post(start_campaign).delete(clear_campaigns),
        )
        .route("/campaigns/:id", get(get_campaign).delete(delete_campaign))
        .route("/campaigns/:id/pause", post(pause_campaign))
        .route("/campaigns/:id/resume", post(resume_campaign))
        .route("/campaigns/:id/cancel", post(cancel_campaign))
        .route("/campaigns/:id/restart", post(restart_campaign))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
