//! Broker and delivery traits

use async_trait::async_trait;

use super::types::{BridgeMessage, BrokerBackend, BrokerError, PresenceChange, SubscribeAck};

/// Message broker shared by every gateway process.
///
/// Provides ordered per-topic publish/subscribe and an atomic presence step.
/// `subscribe` and `unsubscribe` are synchronous so callers can order them
/// under their own locks; inbound messages arrive on the receiver handed out
/// when the broker was created.
#[async_trait]
pub trait Broker: Send + Sync {
    fn backend_type(&self) -> BrokerBackend;

    async fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError>;

    fn subscribe(&self, topic: &str) -> Result<SubscribeAck, BrokerError>;

    fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError>;

    /// Atomically apply `change` to the member's connection count and return
    /// the new count, or [`MEMBER_ABSENT`](super::MEMBER_ABSENT) when a
    /// decrement found no member.
    ///
    /// An increment stores `user_info`; a count reaching zero removes the
    /// member. The transition announcement is published in the same step.
    async fn adjust_member(&self, change: PresenceChange<'_>) -> Result<i64, BrokerError>;

    /// `(user_id, user_info)` of every member under `key`
    async fn members(&self, key: &str) -> Result<Vec<(String, String)>, BrokerError>;

    async fn ping(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// Local receiver of bridge messages for one channel
#[async_trait]
pub trait DeliveryTarget: Send + Sync {
    async fn deliver(&self, message: &BridgeMessage);
}
