//! Shared helpers: gateway nodes attached to one in-process broker hub

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

use pusher_gateway::config::{AppConfig, Settings};
use pusher_gateway::connection_manager::Connection;
use pusher_gateway::pubsub::MemoryHub;
use pusher_gateway::server::AppState;
use pusher_gateway::websocket::OutboundMessage;

pub const APP_ID: &str = "3";
pub const APP_KEY: &str = "765ec374ae0a69f4ce44";
pub const APP_SECRET: &str = "your-pusher-secret";

pub fn create_test_settings() -> Settings {
    Settings::with_app(AppConfig {
        id: APP_ID.to_string(),
        key: APP_KEY.to_string(),
        secret: APP_SECRET.to_string(),
    })
}

/// One gateway process with its delivery loop running
pub struct Node {
    pub state: AppState,
    _shutdown: broadcast::Sender<()>,
}

impl Node {
    pub fn spawn(hub: &Arc<MemoryHub>) -> Self {
        let (broker, inbox) = hub.connect();
        let state = AppState::new(create_test_settings(), Arc::new(broker), None);

        let (shutdown, rx) = broadcast::channel(1);
        tokio::spawn(Arc::clone(&state.bridge).run(inbox, rx));

        Self {
            state,
            _shutdown: shutdown,
        }
    }

    /// Open a connection and consume its `connection_established`
    pub async fn connect(&self) -> Client {
        let (connection, rx) = self.state.dispatcher.open();
        let mut client = Client {
            state: self.state.clone(),
            connection,
            rx,
        };
        assert_eq!(client.next().await["event"], "pusher:connection_established");
        client
    }
}

/// A protocol-level client of one node
pub struct Client {
    state: AppState,
    pub connection: Arc<Connection>,
    rx: mpsc::Receiver<OutboundMessage>,
}

impl Client {
    pub fn socket_id(&self) -> &str {
        self.connection.socket_id()
    }

    pub async fn send_text(&self, text: &str) {
        self.state.dispatcher.handle_text(&self.connection, text).await;
    }

    pub async fn send(&self, frame: Value) {
        self.send_text(&frame.to_string()).await;
    }

    pub async fn subscribe_public(&mut self, channel: &str) -> Value {
        self.send(json!({ "event": "pusher:subscribe", "data": { "channel": channel } }))
            .await;
        self.next().await
    }

    pub async fn subscribe_private(&mut self, channel: &str) -> Value {
        let auth = self
            .state
            .authenticator
            .subscription_token(self.socket_id(), channel, None);
        self.send(json!({
            "event": "pusher:subscribe",
            "data": { "channel": channel, "auth": auth },
        }))
        .await;
        self.next().await
    }

    pub async fn subscribe_presence(&mut self, channel: &str, user_id: &str, user_info: Value) -> Value {
        let channel_data = json!({ "user_id": user_id, "user_info": user_info }).to_string();
        let auth = self
            .state
            .authenticator
            .subscription_token(self.socket_id(), channel, Some(&channel_data));
        self.send(json!({
            "event": "pusher:subscribe",
            "data": { "channel": channel, "auth": auth, "channel_data": channel_data },
        }))
        .await;
        self.next().await
    }

    pub async fn close(&self) {
        self.state.dispatcher.close(&self.connection).await;
    }

    /// Next frame, failing the test after one second
    pub async fn next(&mut self) -> Value {
        let message = tokio::time::timeout(Duration::from_secs(1), self.rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("send path closed");
        serde_json::from_str(&message.to_json().unwrap()).unwrap()
    }

    /// Every frame arriving until the connection stays quiet
    pub async fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(Some(message)) =
            tokio::time::timeout(Duration::from_millis(200), self.rx.recv()).await
        {
            frames.push(serde_json::from_str(&message.to_json().unwrap()).unwrap());
        }
        frames
    }
}

pub fn count_events(frames: &[Value], event: &str) -> usize {
    frames.iter().filter(|f| f["event"] == event).count()
}
