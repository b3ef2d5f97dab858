use std::sync::Arc;
use std::time::Instant;

use crate::auth::Authenticator;
use crate::channel::ChannelManager;
use crate::config::Settings;
use crate::connection_manager::ConnectionManager;
use crate::pubsub::{Broker, BrokerBackend, PubSubBridge};
use crate::redis::RedisHealth;
use crate::websocket::Dispatcher;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub authenticator: Arc<Authenticator>,
    pub connection_manager: Arc<ConnectionManager>,
    pub channel_manager: Arc<ChannelManager>,
    pub dispatcher: Arc<Dispatcher>,
    pub bridge: Arc<PubSubBridge>,
    pub broker_backend: BrokerBackend,
    /// Present when the Redis broker is in use
    pub redis_health: Option<Arc<RedisHealth>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        settings: Settings,
        broker: Arc<dyn Broker>,
        redis_health: Option<Arc<RedisHealth>>,
    ) -> Self {
        let broker_backend = broker.backend_type();
        let authenticator = Arc::new(Authenticator::new(&settings.app));
        let bridge = Arc::new(PubSubBridge::new(
            broker,
            settings.redis.prefix.clone(),
            settings.server.id.clone(),
        ));

        let connection_manager = Arc::new(ConnectionManager::new(settings.websocket.outbound_buffer));
        let channel_manager = Arc::new(ChannelManager::new(
            Arc::clone(&bridge),
            Arc::clone(&authenticator),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&connection_manager),
            Arc::clone(&channel_manager),
            settings.websocket.activity_timeout,
        ));

        Self {
            settings: Arc::new(settings),
            authenticator,
            connection_manager,
            channel_manager,
            dispatcher,
            bridge,
            broker_backend,
            redis_health,
            start_time: Instant::now(),
        }
    }
}
