//! Factory function for creating the configured broker

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::config::Settings;
use crate::redis::{BackoffConfig, RedisHealth, RedisPool};

use super::memory::MemoryHub;
use super::redis::{RedisBroker, RedisSubscriber};
use super::traits::Broker;
use super::types::{BrokerError, BrokerMessage};

/// A broker plus the pieces the server has to drive
pub struct BrokerHandle {
    pub broker: Arc<dyn Broker>,
    /// Messages arriving on subscribed topics
    pub inbox: mpsc::UnboundedReceiver<BrokerMessage>,
    /// Subscriber task to spawn (Redis only)
    pub subscriber: Option<RedisSubscriber>,
    pub redis_health: Option<Arc<RedisHealth>>,
}

/// Create a broker based on configuration
pub fn create_broker(
    settings: &Settings,
    shutdown: &broadcast::Sender<()>,
) -> Result<BrokerHandle, BrokerError> {
    match settings.broker.backend.as_str() {
        "redis" => {
            let health = Arc::new(RedisHealth::new());
            let pool = Arc::new(RedisPool::new(settings.redis.clone(), Arc::clone(&health))?);
            let backoff = BackoffConfig {
                initial_delay_ms: settings.redis.backoff_initial_delay_ms,
                max_delay_ms: settings.redis.backoff_max_delay_ms,
                ..BackoffConfig::default()
            };

            tracing::info!(url = %pool.url(), prefix = %settings.redis.prefix, "Creating Redis broker");
            let (broker, subscriber, inbox) = RedisBroker::new(pool, backoff, shutdown.subscribe());

            Ok(BrokerHandle {
                broker: Arc::new(broker),
                inbox,
                subscriber: Some(subscriber),
                redis_health: Some(health),
            })
        }
        other => {
            if other != "memory" {
                tracing::warn!(backend = %other, "Unknown broker backend, falling back to memory");
            } else {
                tracing::info!("Creating in-process memory broker");
            }

            let (broker, inbox) = MemoryHub::new().connect();
            Ok(BrokerHandle {
                broker: Arc::new(broker),
                inbox,
                subscriber: None,
                redis_health: None,
            })
        }
    }
}
