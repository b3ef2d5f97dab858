use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

use crate::auth::Authenticator;
use crate::connection_manager::Connection;
use crate::metrics::{ChannelMetrics, MessageMetrics};
use crate::pubsub::{BrokerError, PubSubBridge};

use super::error::{RelayError, SubscribeError};
use super::kind::ChannelKind;
use super::types::{Channel, SubscriptionResult};

/// Channel statistics of this process
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStats {
    pub channels: usize,
    pub public: usize,
    pub private: usize,
    pub presence: usize,
}

/// Channels with at least one local subscriber.
///
/// Channels are created on the first local subscribe and released when the
/// last local subscriber leaves.
pub struct ChannelManager {
    channels: DashMap<String, Arc<Channel>>,
    bridge: Arc<PubSubBridge>,
    authenticator: Arc<Authenticator>,
}

impl ChannelManager {
    pub fn new(bridge: Arc<PubSubBridge>, authenticator: Arc<Authenticator>) -> Self {
        Self {
            channels: DashMap::new(),
            bridge,
            authenticator,
        }
    }

    pub fn bridge(&self) -> &Arc<PubSubBridge> {
        &self.bridge
    }

    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.authenticator
    }

    pub fn get(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels
            .get(name)
            .map(|c| Arc::clone(c.value()))
            .filter(|c| !c.is_retired())
    }

    fn get_or_create(&self, name: &str) -> Arc<Channel> {
        match self.channels.entry(name.to_string()) {
            Entry::Occupied(entry) if !entry.get().is_retired() => Arc::clone(entry.get()),
            Entry::Occupied(mut entry) => {
                let channel = self.new_channel(name);
                entry.insert(Arc::clone(&channel));
                channel
            }
            Entry::Vacant(entry) => {
                let channel = self.new_channel(name);
                entry.insert(Arc::clone(&channel));
                channel
            }
        }
    }

    fn new_channel(&self, name: &str) -> Arc<Channel> {
        ChannelMetrics::record_created();
        tracing::debug!(channel = %name, "Channel created");
        Arc::new(Channel::new(
            name,
            Arc::clone(&self.bridge),
            Arc::clone(&self.authenticator),
        ))
    }

    /// Subscribe `connection` to `name`, creating the local channel if needed.
    ///
    /// The name enters the connection's set before anything is awaited, so a
    /// close racing this call always reaches the channel.
    pub async fn subscribe(
        &self,
        connection: &Arc<Connection>,
        name: &str,
        auth: Option<&str>,
        channel_data: Option<&str>,
    ) -> SubscriptionResult {
        let newly_added = connection.add_subscription(name).await;

        let result = self
            .subscribe_channel(connection, name, auth, channel_data)
            .await;

        if let SubscriptionResult::Rejected(e) = &result {
            if newly_added {
                connection.remove_subscription(name).await;
            }
            ChannelMetrics::record_rejected(e.reason());
        }
        result
    }

    async fn subscribe_channel(
        &self,
        connection: &Arc<Connection>,
        name: &str,
        auth: Option<&str>,
        channel_data: Option<&str>,
    ) -> SubscriptionResult {
        loop {
            let channel = self.get_or_create(name);

            if let Err(e) = channel.ensure_bridged().await {
                tracing::warn!(error = %e, channel = %name, "Failed to subscribe process to channel");
                self.release_if_empty(&channel).await;
                return SubscriptionResult::Rejected(SubscribeError::Broker(e));
            }

            match channel.subscribe(connection, auth, channel_data).await {
                SubscriptionResult::Retired => {
                    tokio::task::yield_now().await;
                    continue;
                }
                SubscriptionResult::Subscribed => {
                    ChannelMetrics::record_subscribed(channel.kind().as_str());
                    return SubscriptionResult::Subscribed;
                }
                SubscriptionResult::Rejected(e) => {
                    self.release_if_empty(&channel).await;
                    return SubscriptionResult::Rejected(e);
                }
                SubscriptionResult::AlreadySubscribed => {
                    return SubscriptionResult::AlreadySubscribed
                }
            }
        }
    }

    /// Returns false if the connection was not subscribed
    pub async fn unsubscribe(&self, connection: &Connection, name: &str) -> bool {
        connection.remove_subscription(name).await;

        let Some(channel) = self.get(name) else {
            return false;
        };

        let was_subscribed = channel.unsubscribe(connection).await;
        self.release_if_empty(&channel).await;
        was_subscribed
    }

    pub async fn relay_client_event(
        &self,
        connection: &Connection,
        name: &str,
        event: &str,
        data: Value,
    ) -> Result<(), RelayError> {
        if ChannelKind::from_name(name) == ChannelKind::Public {
            return Err(RelayError::PublicChannel);
        }
        let channel = self.get(name).ok_or(RelayError::NotSubscribed)?;
        channel.relay_client_event(connection, event, data).await
    }

    /// Publish an event from a trusted producer to every subscriber of
    /// `channel`, except `exclude_socket_id`
    pub async fn trigger(
        &self,
        channel: &str,
        event: &str,
        data: Value,
        exclude_socket_id: Option<&str>,
    ) -> Result<(), BrokerError> {
        self.bridge
            .publish(channel, event, data, exclude_socket_id)
            .await?;
        MessageMetrics::record_triggered();
        Ok(())
    }

    async fn release_if_empty(&self, channel: &Arc<Channel>) {
        if !channel.retire_if_empty().await {
            return;
        }

        self.channels
            .remove_if(channel.name(), |_, c| Arc::ptr_eq(c, channel));
        channel.unbridge();
        ChannelMetrics::record_released();
        tracing::debug!(channel = %channel.name(), "Channel released");
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn stats(&self) -> ChannelStats {
        let mut stats = ChannelStats {
            channels: 0,
            public: 0,
            private: 0,
            presence: 0,
        };

        for channel in self.channels.iter() {
            stats.channels += 1;
            match channel.kind() {
                ChannelKind::Public => stats.public += 1,
                ChannelKind::Private => stats.private += 1,
                ChannelKind::Presence => stats.presence += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::pubsub::{BrokerMessage, MemoryHub};
    use crate::websocket::OutboundMessage;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn create_test_manager() -> (
        ChannelManager,
        Arc<MemoryHub>,
        mpsc::UnboundedReceiver<BrokerMessage>,
    ) {
        let hub = MemoryHub::new();
        let (broker, inbox) = hub.connect();
        let bridge = Arc::new(PubSubBridge::new(Arc::new(broker), "test", "gw-test"));
        let authenticator = Arc::new(Authenticator::new(&AppConfig {
            id: "1".to_string(),
            key: "key".to_string(),
            secret: "secret".to_string(),
        }));
        (ChannelManager::new(bridge, authenticator), hub, inbox)
    }

    fn create_connection(socket_id: &str) -> (Arc<Connection>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(16);
        (Arc::new(Connection::new(socket_id.to_string(), tx)), rx)
    }

    #[tokio::test]
    async fn test_channel_lifecycle() {
        let (manager, hub, _inbox) = create_test_manager();
        let (conn, _rx) = create_connection("1.1");

        assert!(matches!(
            manager.subscribe(&conn, "MY_CHANNEL", None, None).await,
            SubscriptionResult::Subscribed
        ));
        assert!(conn.is_subscribed("MY_CHANNEL").await);
        assert_eq!(manager.channel_count(), 1);
        assert_eq!(hub.topic_count(), 1);
        assert_eq!(manager.stats().public, 1);

        assert!(manager.unsubscribe(&conn, "MY_CHANNEL").await);
        assert!(!conn.is_subscribed("MY_CHANNEL").await);
        assert_eq!(manager.channel_count(), 0);
        assert_eq!(hub.topic_count(), 0);

        assert!(!manager.unsubscribe(&conn, "MY_CHANNEL").await);
    }

    #[tokio::test]
    async fn test_rejected_subscription_releases_channel() {
        let (manager, hub, _inbox) = create_test_manager();
        let (conn, _rx) = create_connection("1.1");

        assert!(matches!(
            manager.subscribe(&conn, "private-x", Some("key:00"), None).await,
            SubscriptionResult::Rejected(SubscribeError::Auth(_))
        ));
        assert!(!conn.is_subscribed("private-x").await);
        assert_eq!(manager.channel_count(), 0);
        assert_eq!(hub.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_trigger_reaches_subscriber() {
        let (manager, _hub, mut inbox) = create_test_manager();
        let (conn, mut rx) = create_connection("1.1");
        manager.subscribe(&conn, "MY_CHANNEL", None, None).await;
        rx.try_recv().unwrap();

        manager
            .trigger("MY_CHANNEL", "an_event", json!("payload"), None)
            .await
            .unwrap();
        manager.bridge().deliver(&inbox.recv().await.unwrap()).await;

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap().to_json().unwrap()).unwrap();
        assert_eq!(frame["event"], "an_event");
        assert_eq!(frame["channel"], "MY_CHANNEL");
        assert_eq!(frame["data"], "payload");
    }

    #[tokio::test]
    async fn test_relay_on_public_or_unknown_channel() {
        let (manager, _hub, _inbox) = create_test_manager();
        let (conn, _rx) = create_connection("1.1");

        assert!(matches!(
            manager.relay_client_event(&conn, "MY_CHANNEL", "client-x", json!({})).await,
            Err(RelayError::PublicChannel)
        ));
        assert!(matches!(
            manager.relay_client_event(&conn, "private-x", "client-x", json!({})).await,
            Err(RelayError::NotSubscribed)
        ));
    }
}
