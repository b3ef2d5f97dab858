//! Redis broker
//!
//! Commands (PUBLISH, the presence script, roster reads) go through the
//! shared [`RedisPool`]. Subscriptions live on a dedicated pub/sub connection
//! owned by [`RedisSubscriber`], which receives SUBSCRIBE/UNSUBSCRIBE requests
//! over a command channel and reconnects with exponential backoff.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use redis::Script;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::metrics::BrokerMetrics;
use crate::redis::{BackoffConfig, ExponentialBackoff, RedisHealth, RedisPool};

use super::traits::Broker;
use super::types::{BrokerBackend, BrokerError, BrokerMessage, PresenceChange, SubscribeAck};

/// KEYS[1] counts hash, KEYS[2] members hash;
/// ARGV user_id, delta, user_info, announce topic, announcement.
///
/// Returns the new count, or -1 when a decrement found no member.
const PRESENCE_SCRIPT: &str = r#"
local delta = tonumber(ARGV[2])
local count = redis.call('HINCRBY', KEYS[1], ARGV[1], delta)
local previous = count - delta
if count <= 0 then
    redis.call('HDEL', KEYS[1], ARGV[1])
    redis.call('HDEL', KEYS[2], ARGV[1])
    if previous <= 0 then
        return -1
    end
    redis.call('PUBLISH', ARGV[4], ARGV[5])
    return 0
end
if delta > 0 and ARGV[3] ~= '' then
    redis.call('HSET', KEYS[2], ARGV[1], ARGV[3])
elseif redis.call('HEXISTS', KEYS[2], ARGV[1]) == 0 then
    redis.call('HSET', KEYS[2], ARGV[1], 'null')
end
if previous <= 0 then
    redis.call('PUBLISH', ARGV[4], ARGV[5])
end
return count
"#;

enum SubscriptionCommand {
    Subscribe {
        topic: String,
        ack: oneshot::Sender<Result<(), BrokerError>>,
    },
    Unsubscribe(String),
}

/// Broker backed by a Redis server shared by every gateway process
pub struct RedisBroker {
    pool: Arc<RedisPool>,
    commands: mpsc::UnboundedSender<SubscriptionCommand>,
    presence_script: Script,
}

impl RedisBroker {
    /// Create the broker together with the subscriber task that feeds its inbox
    pub fn new(
        pool: Arc<RedisPool>,
        backoff: BackoffConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, RedisSubscriber, mpsc::UnboundedReceiver<BrokerMessage>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        let subscriber = RedisSubscriber {
            client: pool.client().clone(),
            health: Arc::clone(pool.health()),
            backoff,
            commands: commands_rx,
            inbox: inbox_tx,
            topics: HashSet::new(),
            shutdown,
        };

        let broker = Self {
            pool,
            commands: commands_tx,
            presence_script: Script::new(PRESENCE_SCRIPT),
        };

        (broker, subscriber, inbox_rx)
    }

    fn counts_key(key: &str) -> String {
        format!("{}:counts", key)
    }

    fn members_key(key: &str) -> String {
        format!("{}:members", key)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    fn backend_type(&self) -> BrokerBackend {
        BrokerBackend::Redis
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError> {
        let topic = topic.to_string();
        self.pool
            .execute(|mut conn| async move {
                redis::cmd("PUBLISH")
                    .arg(&topic)
                    .arg(&payload)
                    .query_async::<i64>(&mut conn)
                    .await
            })
            .await?;
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<SubscribeAck, BrokerError> {
        let (ack, rx) = oneshot::channel();
        self.commands
            .send(SubscriptionCommand::Subscribe {
                topic: topic.to_string(),
                ack,
            })
            .map_err(|_| BrokerError::Closed)?;
        Ok(SubscribeAck::pending(rx))
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.commands
            .send(SubscriptionCommand::Unsubscribe(topic.to_string()))
            .map_err(|_| BrokerError::Closed)
    }

    async fn adjust_member(&self, change: PresenceChange<'_>) -> Result<i64, BrokerError> {
        let script = self.presence_script.clone();
        let counts_key = Self::counts_key(change.key);
        let members_key = Self::members_key(change.key);
        let user_id = change.user_id.to_string();
        let delta = change.delta;
        let user_info = change.user_info.unwrap_or_default().to_string();
        let topic = change.topic.to_string();
        let announcement = change.announcement.to_string();

        let count: i64 = self
            .pool
            .execute(|mut conn| async move {
                script
                    .key(&counts_key)
                    .key(&members_key)
                    .arg(&user_id)
                    .arg(delta)
                    .arg(&user_info)
                    .arg(&topic)
                    .arg(&announcement)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        Ok(count)
    }

    async fn members(&self, key: &str) -> Result<Vec<(String, String)>, BrokerError> {
        let members_key = Self::members_key(key);
        let members = self
            .pool
            .execute(|mut conn| async move {
                redis::cmd("HGETALL")
                    .arg(&members_key)
                    .query_async::<Vec<(String, String)>>(&mut conn)
                    .await
            })
            .await?;
        Ok(members)
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        self.pool.ping().await?;
        Ok(())
    }
}

enum Step {
    Shutdown,
    Command(Option<SubscriptionCommand>),
    Message(BrokerMessage),
    StreamEnded,
    Skip,
}

/// Background task owning the dedicated pub/sub connection
pub struct RedisSubscriber {
    client: redis::Client,
    health: Arc<RedisHealth>,
    backoff: BackoffConfig,
    commands: mpsc::UnboundedReceiver<SubscriptionCommand>,
    inbox: mpsc::UnboundedSender<BrokerMessage>,
    /// Topics to restore after a reconnect
    topics: HashSet<String>,
    shutdown: broadcast::Receiver<()>,
}

impl RedisSubscriber {
    /// Run the subscriber task with automatic reconnection
    pub async fn run(mut self) {
        tracing::info!("Redis subscriber starting");

        let mut backoff = ExponentialBackoff::with_config(self.backoff.clone());

        loop {
            match self.run_subscription_loop(&mut backoff).await {
                Ok(()) => {
                    tracing::info!("Redis subscriber stopped gracefully");
                    break;
                }
                Err(e) => {
                    self.health.subscriber_lost();
                    BrokerMetrics::record_reconnection();

                    let delay = backoff.next_delay();
                    tracing::error!(
                        error = %e,
                        attempt = backoff.attempt(),
                        retry_delay_ms = delay.as_millis() as u64,
                        "Redis subscription error, reconnecting"
                    );

                    tokio::select! {
                        _ = self.shutdown.recv() => {
                            tracing::info!("Shutdown requested during reconnect delay");
                            break;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn run_subscription_loop(
        &mut self,
        backoff: &mut ExponentialBackoff,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Pub/sub requires a dedicated connection
        let mut pubsub = self.client.get_async_pubsub().await?;

        for topic in &self.topics {
            pubsub.subscribe(topic).await?;
        }

        backoff.reset();
        self.health.subscriber_connected(self.topics.len());
        tracing::info!(topics = self.topics.len(), "Redis subscriber connected");

        loop {
            let step = {
                let mut messages = pubsub.on_message();

                tokio::select! {
                    biased;

                    _ = self.shutdown.recv() => Step::Shutdown,

                    command = self.commands.recv() => Step::Command(command),

                    msg = messages.next() => match msg {
                        Some(msg) => match msg.get_payload::<String>() {
                            Ok(payload) => Step::Message(BrokerMessage {
                                topic: msg.get_channel_name().to_string(),
                                payload,
                            }),
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to get message payload");
                                Step::Skip
                            }
                        },
                        None => Step::StreamEnded,
                    },
                }
            };

            match step {
                Step::Shutdown => {
                    tracing::info!("Received shutdown signal");
                    return Ok(());
                }
                // Every broker handle is gone
                Step::Command(None) => return Ok(()),
                Step::Command(Some(SubscriptionCommand::Subscribe { topic, ack })) => {
                    self.topics.insert(topic.clone());
                    if let Err(e) = pubsub.subscribe(&topic).await {
                        let _ = ack.send(Err(BrokerError::Subscribe(e.to_string())));
                        return Err(e.into());
                    }
                    self.health.set_subscribed_topics(self.topics.len());
                    tracing::debug!(topic = %topic, "Subscribed to topic");
                    let _ = ack.send(Ok(()));
                }
                Step::Command(Some(SubscriptionCommand::Unsubscribe(topic))) => {
                    if self.topics.remove(&topic) {
                        pubsub.unsubscribe(&topic).await?;
                        self.health.set_subscribed_topics(self.topics.len());
                        tracing::debug!(topic = %topic, "Unsubscribed from topic");
                    }
                }
                Step::Message(message) => {
                    BrokerMetrics::record_message_received();
                    if self.inbox.send(message).is_err() {
                        tracing::info!("Broker inbox closed, stopping subscriber");
                        return Ok(());
                    }
                }
                Step::StreamEnded => {
                    tracing::warn!("Redis message stream ended unexpectedly");
                    return Err("Message stream ended".into());
                }
                Step::Skip => {}
            }
        }
    }
}
