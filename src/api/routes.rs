use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;
use crate::triggers::{trigger_channel_event, trigger_events};

use super::health::{health, stats};
use super::metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        // Pusher REST API
        .route("/apps/{app_id}/events", post(trigger_events))
        .route(
            "/apps/{app_id}/channels/{channel}/events",
            post(trigger_channel_event),
        )
}
