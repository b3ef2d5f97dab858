use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};

use crate::connection_manager::Connection;
use crate::server::AppState;

use super::message::{ServerMessage, ERROR_APP_NOT_FOUND};

/// WebSocket upgrade handler for `/app/{key}`
#[tracing::instrument(name = "ws.upgrade", skip(ws, state))]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(app_key): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, app_key))
}

/// Handle an upgraded socket until either side goes away
async fn handle_socket(socket: WebSocket, state: AppState, app_key: String) {
    if app_key != state.authenticator.app_key() {
        tracing::warn!(app_key = %app_key, "Connection with unknown app key");
        reject_socket(socket, &app_key).await;
        return;
    }

    let connection_start = std::time::Instant::now();
    let (connection, mut rx) = state.dispatcher.open();
    let socket_id = connection.socket_id().to_string();

    tracing::info!(socket_id = %socket_id, "WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for writing queued frames to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // Inbound frames are processed one at a time. Only the wait for the next
    // frame races the send task; a frame being handled always runs to the end.
    loop {
        let next = tokio::select! {
            _ = &mut send_task => {
                tracing::debug!(socket_id = %socket_id, "Send task completed");
                break;
            }
            next = ws_receiver.next() => next,
        };

        match next {
            Some(Ok(msg)) => {
                if !process_message(msg, &state, &connection).await {
                    break;
                }
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "WebSocket receive error");
                break;
            }
            None => {
                tracing::debug!(socket_id = %socket_id, "Receive loop completed");
                break;
            }
        }
    }

    state.dispatcher.close(&connection).await;
    send_task.abort();

    tracing::info!(
        socket_id = %socket_id,
        duration_secs = connection_start.elapsed().as_secs_f64(),
        "WebSocket connection closed"
    );
}

/// Returns false if the connection should be closed
async fn process_message(msg: Message, state: &AppState, connection: &Arc<Connection>) -> bool {
    match msg {
        Message::Text(text) => {
            state.dispatcher.handle_text(connection, text.as_str()).await;
            true
        }
        // Protocol frames are JSON text; binary is dropped like any malformed frame
        Message::Binary(_) => true,
        // Axum answers pings itself
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            tracing::debug!(socket_id = %connection.socket_id(), "Received close frame");
            false
        }
    }
}

async fn reject_socket(socket: WebSocket, app_key: &str) {
    let (mut ws_sender, _) = socket.split();
    let error = ServerMessage::error(
        Some(ERROR_APP_NOT_FOUND),
        format!("Could not find app by key {}", app_key),
    );
    if let Ok(json) = serde_json::to_string(&error) {
        let _ = ws_sender.send(Message::Text(json.into())).await;
    }
    let _ = ws_sender.close().await;
}
