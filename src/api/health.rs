//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::channel::ChannelStats;
use crate::connection_manager::ConnectionStats;
use crate::redis::RedisHealthStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub broker: BrokerHealthResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthResponse>,
}

#[derive(Debug, Serialize)]
pub struct BrokerHealthResponse {
    pub backend: String,
    pub subscribed_channels: usize,
}

#[derive(Debug, Serialize)]
pub struct RedisHealthResponse {
    pub status: String,
    pub subscribed_topics: usize,
    /// Unix millis of the last subscriber (re)connect
    pub last_resubscribe_ms: i64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub server_id: String,
    pub connections: ConnectionStats,
    pub channels: ChannelStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthStats>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    // The memory broker is always available
    let healthy = state
        .redis_health
        .as_ref()
        .map_or(true, |health| health.is_healthy());

    let redis = state.redis_health.as_ref().map(|health| {
        let stats = health.stats();
        RedisHealthResponse {
            status: stats.status.as_str().to_string(),
            subscribed_topics: stats.subscribed_topics,
            last_resubscribe_ms: stats.last_resubscribe_ms,
        }
    });

    let status = if healthy { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        broker: BrokerHealthResponse {
            backend: state.broker_backend.as_str().to_string(),
            subscribed_channels: state.bridge.subscribed_channels(),
        },
        redis,
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        server_id: state.bridge.server_id().to_string(),
        connections: state.connection_manager.stats(),
        channels: state.channel_manager.stats(),
        redis: state.redis_health.as_ref().map(|health| health.stats()),
    })
}
