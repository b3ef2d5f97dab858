//! HTTP trigger handlers

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{Method, Uri},
    Json,
};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::server::AppState;

use super::models::{TriggerEventRequest, TriggerEventResponse};

/// Check the app id and the request signature
fn authorize(
    state: &AppState,
    app_id: &str,
    method: &Method,
    uri: &Uri,
    params: &HashMap<String, String>,
) -> Result<()> {
    if app_id != state.settings.app.id {
        return Err(AppError::NotFound(format!("Unknown app: {}", app_id)));
    }

    state.authenticator.verify_api_request(
        method.as_str(),
        uri.path(),
        params,
        chrono::Utc::now().timestamp(),
        state.settings.api.timestamp_grace_seconds,
    )?;
    Ok(())
}

/// POST /apps/{app_id}/events
#[tracing::instrument(
    name = "http.trigger_events",
    skip(state, method, uri, params, request),
    fields(event = %request.name)
)]
pub async fn trigger_events(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    method: Method,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
    Json(request): Json<TriggerEventRequest>,
) -> Result<Json<TriggerEventResponse>> {
    authorize(&state, &app_id, &method, &uri, &params)?;
    let channels = request.target_channels()?;

    for channel in &channels {
        state
            .channel_manager
            .trigger(
                channel,
                &request.name,
                request.data.clone(),
                request.socket_id.as_deref(),
            )
            .await?;
    }

    tracing::debug!(channel_count = channels.len(), "Event triggered");
    Ok(Json(TriggerEventResponse {}))
}

/// POST /apps/{app_id}/channels/{channel}/events
///
/// Legacy form: the event name and socket_id travel in the query string and
/// the body is the raw payload.
#[tracing::instrument(
    name = "http.trigger_channel_event",
    skip(state, method, uri, params, body)
)]
pub async fn trigger_channel_event(
    State(state): State<AppState>,
    Path((app_id, channel)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
    body: String,
) -> Result<Json<TriggerEventResponse>> {
    authorize(&state, &app_id, &method, &uri, &params)?;

    let name = params
        .get("name")
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::Validation("Event name is required".to_string()))?;

    state
        .channel_manager
        .trigger(
            &channel,
            name,
            Value::String(body),
            params.get("socket_id").map(String::as_str),
        )
        .await?;

    Ok(Json(TriggerEventResponse {}))
}
