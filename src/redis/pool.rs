//! Shared Redis command connection
//!
//! Every PUBLISH, presence script and roster read goes through one
//! [`ConnectionManager`], opened on first use. The manager multiplexes
//! concurrent commands and reconnects by itself after a drop; the pool only
//! reports failures to [`RedisHealth`].

use std::future::Future;
use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::{Client, RedisError, RedisResult};
use tokio::sync::OnceCell;

use crate::config::RedisConfig;

use super::RedisHealth;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),
}

pub struct RedisPool {
    client: Client,
    manager: OnceCell<ConnectionManager>,
    health: Arc<RedisHealth>,
    url: String,
}

impl RedisPool {
    /// Validates the URL; no connection is opened yet
    pub fn new(config: RedisConfig, health: Arc<RedisHealth>) -> Result<Self, PoolError> {
        Ok(Self {
            client: Client::open(config.url.as_str())?,
            manager: OnceCell::new(),
            health,
            url: config.url,
        })
    }

    async fn manager(&self) -> Result<ConnectionManager, PoolError> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                let manager = ConnectionManager::new(self.client.clone()).await?;
                tracing::info!(url = %self.url, "Redis command connection established");
                Ok::<_, RedisError>(manager)
            })
            .await;

        match manager {
            Ok(manager) => Ok(manager.clone()),
            Err(e) => {
                self.health.commands_failed();
                tracing::error!(error = %e, "Failed to connect to Redis");
                Err(e.into())
            }
        }
    }

    /// Run a command on the shared connection
    pub async fn execute<F, T, Fut>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let result = f(self.manager().await?).await;

        match &result {
            Ok(_) => self.health.commands_succeeded(),
            Err(e) if e.is_connection_dropped() || e.is_io_error() || e.is_timeout() => {
                self.health.commands_failed();
                tracing::warn!(error = %e, "Redis command connection failed");
            }
            // Script or type errors say nothing about the link
            Err(_) => {}
        }

        result.map_err(PoolError::from)
    }

    /// Client for opening the dedicated pub/sub connection
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn health(&self) -> &Arc<RedisHealth> {
        &self.health
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn ping(&self) -> Result<(), PoolError> {
        self.execute(|mut conn| async move {
            redis::cmd("PING").query_async::<String>(&mut conn).await
        })
        .await?;
        Ok(())
    }
}
