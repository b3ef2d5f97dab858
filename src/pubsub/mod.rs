//! Cross-process fan-out
//!
//! The [`Broker`] trait abstracts the shared message broker (Redis in
//! production, an in-process hub for single-node runs and tests). The
//! [`PubSubBridge`] sits on top of it and connects broker topics to the
//! local channel objects.

mod bridge;
mod factory;
mod memory;
mod redis;
mod traits;
mod types;

pub use bridge::{BridgeToken, PubSubBridge};
pub use factory::{create_broker, BrokerHandle};
pub use memory::{MemoryBroker, MemoryHub};
pub use self::redis::{RedisBroker, RedisSubscriber};
pub use traits::{Broker, DeliveryTarget};
pub use types::{
    BridgeMessage, BrokerBackend, BrokerError, BrokerMessage, PresenceChange, SubscribeAck,
    MEMBER_ABSENT,
};
