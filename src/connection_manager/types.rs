//! Connection handle and related types

use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;

use crate::metrics::MessageMetrics;
use crate::websocket::OutboundMessage;

/// Protocol state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Socket upgraded, `connection_established` not yet sent
    Connecting = 0,
    Established = 1,
    Closed = 2,
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Established,
            _ => ConnectionState::Closed,
        }
    }
}

/// `<digits>.<digits>`, the shape Pusher server libraries expect
pub fn generate_socket_id() -> String {
    let mut rng = rand::rng();
    format!("{}.{}", rng.random::<u32>(), rng.random::<u32>())
}

/// Handle for a single WebSocket connection
pub struct Connection {
    socket_id: String,
    sender: mpsc::Sender<OutboundMessage>,
    pub connected_at: DateTime<Utc>,
    subscriptions: RwLock<HashSet<String>>,
    state: AtomicU8,
}

impl Connection {
    pub fn new(socket_id: String, sender: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            socket_id,
            sender,
            connected_at: Utc::now(),
            subscriptions: RwLock::new(HashSet::new()),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
        }
    }

    pub fn socket_id(&self) -> &str {
        &self.socket_id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::Acquire))
    }

    /// Connecting -> Established; false if the connection already moved on
    pub fn mark_established(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Established as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Move to Closed. Returns false if the connection was already closed.
    pub fn close(&self) -> bool {
        self.state
            .swap(ConnectionState::Closed as u8, Ordering::AcqRel)
            != ConnectionState::Closed as u8
    }

    /// Queue a frame without waiting.
    ///
    /// A full buffer drops the frame; the socket is too slow to keep up.
    pub fn send(&self, message: impl Into<OutboundMessage>) -> bool {
        if self.is_closed() {
            return false;
        }

        match self.sender.try_send(message.into()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                MessageMetrics::record_dropped();
                tracing::warn!(socket_id = %self.socket_id, "Outbound buffer full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub async fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.read().await.contains(channel)
    }

    /// Returns false if the channel was already in the set
    pub async fn add_subscription(&self, channel: &str) -> bool {
        self.subscriptions.write().await.insert(channel.to_string())
    }

    pub async fn remove_subscription(&self, channel: &str) -> bool {
        self.subscriptions.write().await.remove(channel)
    }

    /// Empty the subscription set and return what it held
    pub async fn take_subscriptions(&self) -> Vec<String> {
        self.subscriptions.write().await.drain().collect()
    }
}
