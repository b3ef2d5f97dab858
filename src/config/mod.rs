mod settings;

pub use settings::{
    ApiConfig, AppConfig, BrokerConfig, RedisConfig, ServerConfig, Settings, WebSocketConfig,
};
