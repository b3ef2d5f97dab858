//! Broker-facing types

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::redis::PoolError;

/// How long a subscribe waits for the broker to confirm
const SUBSCRIBE_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// Broker backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    Memory,
    Redis,
}

impl BrokerBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerBackend::Memory => "memory",
            BrokerBackend::Redis => "redis",
        }
    }
}

/// Broker error types
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Redis pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Subscription failed: {0}")]
    Subscribe(String),

    #[error("Broker did not answer in time")]
    Timeout,

    #[error("Broker is closed")]
    Closed,
}

/// Raw message received on a broker topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: String,
}

/// Envelope carried on a channel topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeMessage {
    pub event: String,
    pub channel: String,
    #[serde(default)]
    pub data: Value,
    /// Socket that must not receive this message
    #[serde(
        rename = "socket_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub exclude_socket_id: Option<String>,
    /// Server that published the message
    #[serde(default)]
    pub origin: String,
}

/// Returned by [`Broker::adjust_member`](super::Broker::adjust_member) when a
/// decrement found no such member
pub const MEMBER_ABSENT: i64 = -1;

/// One step of a presence counter.
///
/// `announcement` is published on `topic` in the same atomic step when the
/// member appears (0 -> 1) or disappears (1 -> 0), so announcements of one
/// member reach every process in counter order.
#[derive(Debug, Clone, Copy)]
pub struct PresenceChange<'a> {
    pub key: &'a str,
    pub user_id: &'a str,
    pub delta: i64,
    /// Stored on increments
    pub user_info: Option<&'a str>,
    pub topic: &'a str,
    pub announcement: &'a str,
}

/// Confirmation of a topic subscription.
///
/// The broker registers the subscription when `subscribe` returns; awaiting
/// [`SubscribeAck::confirmed`] waits until messages on the topic are flowing.
#[must_use]
pub struct SubscribeAck(Option<oneshot::Receiver<Result<(), BrokerError>>>);

impl SubscribeAck {
    pub fn ready() -> Self {
        Self(None)
    }

    pub fn pending(rx: oneshot::Receiver<Result<(), BrokerError>>) -> Self {
        Self(Some(rx))
    }

    pub async fn confirmed(self) -> Result<(), BrokerError> {
        let Some(rx) = self.0 else {
            return Ok(());
        };

        match tokio::time::timeout(SUBSCRIBE_CONFIRM_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BrokerError::Closed),
            Err(_) => Err(BrokerError::Timeout),
        }
    }
}
