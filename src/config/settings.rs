use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub app: AppConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Identifier of this process inside the fleet
    #[serde(default = "default_server_id")]
    pub id: String,
}

/// Credentials of the single application served by this gateway
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub id: String,
    pub key: String,
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Namespace for pub/sub topics and presence keys
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
    /// Initial reconnect delay of the subscriber loop
    #[serde(default = "default_backoff_initial_delay_ms")]
    pub backoff_initial_delay_ms: u64,
    /// Upper bound of the reconnect delay
    #[serde(default = "default_backoff_max_delay_ms")]
    pub backoff_max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// "redis" or "memory"
    #[serde(default = "default_broker_backend")]
    pub backend: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Advertised to clients in `pusher:connection_established` (seconds)
    #[serde(default = "default_activity_timeout")]
    pub activity_timeout: u64,
    /// Frames buffered per connection before new frames are dropped
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Accepted clock skew for signed trigger requests (seconds)
    #[serde(default = "default_timestamp_grace")]
    pub timestamp_grace_seconds: i64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_server_id() -> String {
    format!("gw-{}", uuid::Uuid::new_v4().simple())
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_prefix() -> String {
    "pusher".to_string()
}

fn default_backoff_initial_delay_ms() -> u64 {
    100
}

fn default_backoff_max_delay_ms() -> u64 {
    30_000
}

fn default_broker_backend() -> String {
    "redis".to_string()
}

fn default_activity_timeout() -> u64 {
    120
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_timestamp_grace() -> i64 {
    600 // 10 minutes
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("redis.url", "redis://localhost:6379")?
            .set_default("broker.backend", "redis")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER_PORT, APP_KEY, APP_SECRET, REDIS_URL, BROKER_BACKEND, ...
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Default settings serving a single application
    pub fn with_app(app: AppConfig) -> Self {
        Self {
            server: ServerConfig::default(),
            app,
            redis: RedisConfig::default(),
            broker: BrokerConfig::default(),
            websocket: WebSocketConfig::default(),
            api: ApiConfig::default(),
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            id: default_server_id(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            prefix: default_redis_prefix(),
            backoff_initial_delay_ms: default_backoff_initial_delay_ms(),
            backoff_max_delay_ms: default_backoff_max_delay_ms(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: default_broker_backend(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            activity_timeout: default_activity_timeout(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            timestamp_grace_seconds: default_timestamp_grace(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8080);
        assert!(server.id.starts_with("gw-"));

        let redis = RedisConfig::default();
        assert_eq!(redis.prefix, "pusher");

        assert_eq!(BrokerConfig::default().backend, "redis");
        assert_eq!(WebSocketConfig::default().activity_timeout, 120);
    }

    #[test]
    fn test_with_app() {
        let settings = Settings::with_app(AppConfig {
            id: "1".to_string(),
            key: "key".to_string(),
            secret: "secret".to_string(),
        });
        assert_eq!(settings.app.key, "key");
        assert_eq!(settings.server_addr(), "0.0.0.0:8080");
        assert_eq!(settings.api.timestamp_grace_seconds, 600);
    }

    #[test]
    fn test_server_ids_are_unique() {
        assert_ne!(ServerConfig::default().id, ServerConfig::default().id);
    }
}
