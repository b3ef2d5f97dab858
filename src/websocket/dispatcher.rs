//! Protocol dispatcher
//!
//! Parses inbound frames of one connection and routes them to the channel
//! layer. Frames of a connection are handled one at a time, in order.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::channel::{ChannelManager, SubscriptionResult};
use crate::connection_manager::{Connection, ConnectionManager};
use crate::metrics::ConnectionMetrics;

use super::message::{
    ClientFrame, OutboundMessage, ServerMessage, SubscribeRequest, UnsubscribeRequest, PING,
    SUBSCRIBE, UNSUBSCRIBE,
};

pub struct Dispatcher {
    connections: Arc<ConnectionManager>,
    channels: Arc<ChannelManager>,
    activity_timeout: u64,
}

impl Dispatcher {
    pub fn new(
        connections: Arc<ConnectionManager>,
        channels: Arc<ChannelManager>,
        activity_timeout: u64,
    ) -> Self {
        Self {
            connections,
            channels,
            activity_timeout,
        }
    }

    /// Register a connection and greet it with `pusher:connection_established`
    pub fn open(&self) -> (Arc<Connection>, mpsc::Receiver<OutboundMessage>) {
        let (connection, rx) = self.connections.register();

        connection.send(ServerMessage::connection_established(
            connection.socket_id(),
            self.activity_timeout,
        ));
        connection.mark_established();

        (connection, rx)
    }

    /// Handle one text frame; malformed frames are dropped without reply
    #[tracing::instrument(name = "ws.frame", skip(self, connection, text), fields(socket_id = %connection.socket_id()))]
    pub async fn handle_text(&self, connection: &Arc<Connection>, text: &str) {
        if connection.is_closed() {
            return;
        }

        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                ConnectionMetrics::record_malformed_frame();
                tracing::debug!(error = %e, "Dropping malformed frame");
                return;
            }
        };

        match frame.event.as_str() {
            SUBSCRIBE => self.handle_subscribe(connection, frame.data_object()).await,
            UNSUBSCRIBE => self.handle_unsubscribe(connection, frame.data_object()).await,
            PING => {
                connection.send(ServerMessage::pong());
            }
            _ if frame.is_client_event() => self.handle_client_event(connection, frame).await,
            other => {
                tracing::debug!(event = %other, "Ignoring unknown event");
            }
        }
    }

    async fn handle_subscribe(&self, connection: &Arc<Connection>, data: Value) {
        let request: SubscribeRequest = match serde_json::from_value(data) {
            Ok(request) => request,
            Err(e) => {
                ConnectionMetrics::record_malformed_frame();
                tracing::debug!(error = %e, "Dropping malformed subscribe");
                return;
            }
        };

        let channel_data = request.channel_data_raw();
        let result = self
            .channels
            .subscribe(
                connection,
                &request.channel,
                request.auth.as_deref(),
                channel_data.as_deref(),
            )
            .await;

        if let SubscriptionResult::Rejected(e) = result {
            tracing::info!(
                channel = %request.channel,
                reason = e.reason(),
                error = %e,
                "Subscription rejected"
            );
            connection.send(ServerMessage::error(None, e.to_string()));
        }
    }

    async fn handle_unsubscribe(&self, connection: &Arc<Connection>, data: Value) {
        let request: UnsubscribeRequest = match serde_json::from_value(data) {
            Ok(request) => request,
            Err(e) => {
                ConnectionMetrics::record_malformed_frame();
                tracing::debug!(error = %e, "Dropping malformed unsubscribe");
                return;
            }
        };

        self.channels
            .unsubscribe(connection, &request.channel)
            .await;
    }

    async fn handle_client_event(&self, connection: &Arc<Connection>, frame: ClientFrame) {
        let Some(channel) = frame.channel.as_deref() else {
            tracing::debug!(event = %frame.event, "Client event without channel");
            return;
        };

        if !connection.is_subscribed(channel).await {
            tracing::debug!(channel = %channel, event = %frame.event, "Client event on unsubscribed channel");
            return;
        }

        if let Err(e) = self
            .channels
            .relay_client_event(connection, channel, &frame.event, frame.data.clone())
            .await
        {
            tracing::debug!(channel = %channel, event = %frame.event, error = %e, "Client event dropped");
        }
    }

    /// Tear the connection down: leave every channel and unregister.
    ///
    /// Calling it again is a no-op.
    pub async fn close(&self, connection: &Connection) {
        if !connection.close() {
            return;
        }

        for channel in connection.take_subscriptions().await {
            self.channels.unsubscribe(connection, &channel).await;
        }
        self.connections.unregister(connection.socket_id());
    }
}
