//! PubSub bridge between local channels and the broker
//!
//! Every channel with local subscribers registers one [`DeliveryTarget`] and
//! the process subscribes to that channel's broker topic. Everything published
//! on a topic, including messages this process published itself, comes back
//! through the broker loop and is handed to the registered target, so local
//! and remote subscribers observe the same order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::websocket::ServerMessage;

use super::traits::{Broker, DeliveryTarget};
use super::types::{BridgeMessage, BrokerError, BrokerMessage, PresenceChange};

/// Identifies one registration of a channel with the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeToken(u64);

struct Registration {
    token: u64,
    target: Arc<dyn DeliveryTarget>,
}

pub struct PubSubBridge {
    broker: Arc<dyn Broker>,
    /// Prefix of every topic and presence key
    namespace: String,
    server_id: String,
    targets: DashMap<String, Registration>,
    next_token: AtomicU64,
}

impl PubSubBridge {
    pub fn new(
        broker: Arc<dyn Broker>,
        namespace: impl Into<String>,
        server_id: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            namespace: namespace.into(),
            server_id: server_id.into(),
            targets: DashMap::new(),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Channels this process is currently subscribed to
    pub fn subscribed_channels(&self) -> usize {
        self.targets.len()
    }

    fn channel_topic(&self, channel: &str) -> String {
        format!("{}:channel:{}", self.namespace, channel)
    }

    fn presence_key(&self, channel: &str) -> String {
        format!("{}:presence:{}", self.namespace, channel)
    }

    fn channel_from_topic<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic
            .strip_prefix(self.namespace.as_str())?
            .strip_prefix(":channel:")
    }

    /// Publish an event to every subscriber of `channel` on every process,
    /// except the socket named by `exclude_socket_id`
    #[tracing::instrument(skip(self, data), fields(server_id = %self.server_id))]
    pub async fn publish(
        &self,
        channel: &str,
        event: &str,
        data: Value,
        exclude_socket_id: Option<&str>,
    ) -> Result<(), BrokerError> {
        let payload = self.envelope(channel, event, data, exclude_socket_id)?;
        self.broker.publish(&self.channel_topic(channel), payload).await
    }

    fn envelope(
        &self,
        channel: &str,
        event: &str,
        data: Value,
        exclude_socket_id: Option<&str>,
    ) -> Result<String, BrokerError> {
        let message = BridgeMessage {
            event: event.to_string(),
            channel: channel.to_string(),
            data,
            exclude_socket_id: exclude_socket_id.map(str::to_string),
            origin: self.server_id.clone(),
        };
        Ok(serde_json::to_string(&message)?)
    }

    /// Route messages on `channel` to `target`, replacing any previous target.
    ///
    /// Resolves once the broker confirms the topic subscription.
    pub async fn subscribe_process_to(
        &self,
        channel: &str,
        target: Arc<dyn DeliveryTarget>,
    ) -> Result<BridgeToken, BrokerError> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let registration = Registration { token, target };

        // Broker commands are issued under the entry guard so that subscribe
        // and unsubscribe of one topic reach the broker in registration order
        let ack = match self.targets.entry(channel.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.insert(registration);
                None
            }
            Entry::Vacant(entry) => {
                let ack = self.broker.subscribe(&self.channel_topic(channel))?;
                entry.insert(registration);
                Some(ack)
            }
        };

        if let Some(ack) = ack {
            if let Err(e) = ack.confirmed().await {
                self.unsubscribe_process_from(channel, BridgeToken(token));
                return Err(e);
            }
            tracing::debug!(channel = %channel, "Process subscribed to channel");
        }

        Ok(BridgeToken(token))
    }

    /// Drop the registration made with `token`; a newer registration is kept
    pub fn unsubscribe_process_from(&self, channel: &str, token: BridgeToken) {
        if let Entry::Occupied(entry) = self.targets.entry(channel.to_string()) {
            if entry.get().token != token.0 {
                return;
            }
            entry.remove();
            if let Err(e) = self.broker.unsubscribe(&self.channel_topic(channel)) {
                tracing::warn!(error = %e, channel = %channel, "Failed to unsubscribe from channel topic");
            }
            tracing::debug!(channel = %channel, "Process unsubscribed from channel");
        }
    }

    /// Add one connection of `user_id`; returns the fleet-wide count.
    ///
    /// `announcement` reaches every subscriber but `exclude_socket_id` when
    /// this was the user's first connection.
    pub async fn increment_presence(
        &self,
        channel: &str,
        user_id: &str,
        user_info: &Value,
        announcement: &ServerMessage,
        exclude_socket_id: Option<&str>,
    ) -> Result<i64, BrokerError> {
        let info = serde_json::to_string(user_info)?;
        self.adjust_presence(channel, user_id, 1, Some(&info), announcement, exclude_socket_id)
            .await
    }

    /// Remove one connection of `user_id`; returns the fleet-wide count, or
    /// [`MEMBER_ABSENT`](super::MEMBER_ABSENT) if the user had none.
    ///
    /// `announcement` is published when the last connection leaves.
    pub async fn decrement_presence(
        &self,
        channel: &str,
        user_id: &str,
        announcement: &ServerMessage,
    ) -> Result<i64, BrokerError> {
        self.adjust_presence(channel, user_id, -1, None, announcement, None)
            .await
    }

    async fn adjust_presence(
        &self,
        channel: &str,
        user_id: &str,
        delta: i64,
        user_info: Option<&str>,
        announcement: &ServerMessage,
        exclude_socket_id: Option<&str>,
    ) -> Result<i64, BrokerError> {
        let announcement = self.envelope(
            channel,
            &announcement.event,
            announcement.data.clone(),
            exclude_socket_id,
        )?;

        let key = self.presence_key(channel);
        let topic = self.channel_topic(channel);

        let count = self
            .broker
            .adjust_member(PresenceChange {
                key: &key,
                user_id,
                delta,
                user_info,
                topic: &topic,
                announcement: &announcement,
            })
            .await?;
        Ok(count)
    }

    /// Roster of `channel` as `(user_id, user_info)`
    pub async fn presence_members(&self, channel: &str) -> Result<Vec<(String, Value)>, BrokerError> {
        let members = self.broker.members(&self.presence_key(channel)).await?;

        Ok(members
            .into_iter()
            .map(|(user_id, info)| {
                let info = serde_json::from_str(&info).unwrap_or(Value::Null);
                (user_id, info)
            })
            .collect())
    }

    /// Hand one broker message to the channel registered for its topic
    pub async fn deliver(&self, message: &BrokerMessage) {
        let Some(channel) = self.channel_from_topic(&message.topic) else {
            tracing::debug!(topic = %message.topic, "Ignoring message on foreign topic");
            return;
        };

        let bridge_message: BridgeMessage = match serde_json::from_str(&message.payload) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, topic = %message.topic, "Failed to parse bridge message");
                return;
            }
        };

        // Clone out of the map; the guard must not live across the await
        let target = self.targets.get(channel).map(|r| Arc::clone(&r.target));
        if let Some(target) = target {
            target.deliver(&bridge_message).await;
        }
    }

    /// Delivery loop draining the broker inbox
    pub async fn run(
        self: Arc<Self>,
        mut inbox: mpsc::UnboundedReceiver<BrokerMessage>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!(server_id = %self.server_id, "PubSub bridge starting");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    tracing::info!("PubSub bridge received shutdown signal");
                    break;
                }

                message = inbox.recv() => match message {
                    Some(message) => self.deliver(&message).await,
                    None => {
                        tracing::warn!("Broker inbox closed");
                        break;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::MemoryHub;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        received: Mutex<Vec<BridgeMessage>>,
    }

    #[async_trait]
    impl DeliveryTarget for Recorder {
        async fn deliver(&self, message: &BridgeMessage) {
            self.received.lock().await.push(message.clone());
        }
    }

    fn create_test_bridge(
        hub: &Arc<MemoryHub>,
        server_id: &str,
    ) -> (Arc<PubSubBridge>, mpsc::UnboundedReceiver<BrokerMessage>) {
        let (broker, inbox) = hub.connect();
        (Arc::new(PubSubBridge::new(Arc::new(broker), "test", server_id)), inbox)
    }

    #[tokio::test]
    async fn test_publish_round_trips_through_broker() {
        let hub = MemoryHub::new();
        let (bridge, mut inbox) = create_test_bridge(&hub, "gw-a");
        let recorder = Arc::new(Recorder::default());

        bridge.subscribe_process_to("MY_CHANNEL", recorder.clone()).await.unwrap();
        bridge
            .publish("MY_CHANNEL", "an_event", json!({ "some": "data" }), Some("1.2"))
            .await
            .unwrap();

        let raw = inbox.recv().await.unwrap();
        assert_eq!(raw.topic, "test:channel:MY_CHANNEL");
        bridge.deliver(&raw).await;

        let received = recorder.received.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event, "an_event");
        assert_eq!(received[0].exclude_socket_id.as_deref(), Some("1.2"));
        assert_eq!(received[0].origin, "gw-a");
    }

    #[tokio::test]
    async fn test_fan_out_to_other_process() {
        let hub = MemoryHub::new();
        let (a, _a_inbox) = create_test_bridge(&hub, "gw-a");
        let (b, mut b_inbox) = create_test_bridge(&hub, "gw-b");
        let recorder = Arc::new(Recorder::default());

        b.subscribe_process_to("news", recorder.clone()).await.unwrap();
        a.publish("news", "update", json!("x"), None).await.unwrap();

        b.deliver(&b_inbox.recv().await.unwrap()).await;
        assert_eq!(recorder.received.lock().await[0].origin, "gw-a");
    }

    #[tokio::test]
    async fn test_stale_token_does_not_unsubscribe() {
        let hub = MemoryHub::new();
        let (bridge, _inbox) = create_test_bridge(&hub, "gw-a");

        let old = bridge
            .subscribe_process_to("c", Arc::new(Recorder::default()))
            .await
            .unwrap();
        let new = bridge
            .subscribe_process_to("c", Arc::new(Recorder::default()))
            .await
            .unwrap();
        assert_ne!(old, new);

        bridge.unsubscribe_process_from("c", old);
        assert_eq!(bridge.subscribed_channels(), 1);
        assert_eq!(hub.topic_count(), 1);

        bridge.unsubscribe_process_from("c", new);
        assert_eq!(bridge.subscribed_channels(), 0);
        assert_eq!(hub.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_presence_counter_and_roster() {
        let hub = MemoryHub::new();
        let (a, _a_inbox) = create_test_bridge(&hub, "gw-a");
        let (b, _b_inbox) = create_test_bridge(&hub, "gw-b");

        let info = json!({ "name": "SG" });
        let added = ServerMessage::member_added("presence-c", "U1", info.clone());
        let removed = ServerMessage::member_removed("presence-c", "U1");
        assert_eq!(a.increment_presence("presence-c", "U1", &info, &added, None).await.unwrap(), 1);
        assert_eq!(b.increment_presence("presence-c", "U1", &info, &added, None).await.unwrap(), 2);

        let members = b.presence_members("presence-c").await.unwrap();
        assert_eq!(members, vec![("U1".to_string(), info)]);

        assert_eq!(a.decrement_presence("presence-c", "U1", &removed).await.unwrap(), 1);
        assert_eq!(b.decrement_presence("presence-c", "U1", &removed).await.unwrap(), 0);
        assert!(a.presence_members("presence-c").await.unwrap().is_empty());

        assert_eq!(
            a.decrement_presence("presence-c", "U1", &removed).await.unwrap(),
            crate::pubsub::MEMBER_ABSENT
        );
    }

    #[tokio::test]
    async fn test_presence_announcements_travel_with_counter() {
        let hub = MemoryHub::new();
        let (a, _a_inbox) = create_test_bridge(&hub, "gw-a");
        let (b, mut b_inbox) = create_test_bridge(&hub, "gw-b");
        let recorder = Arc::new(Recorder::default());
        b.subscribe_process_to("presence-c", recorder.clone()).await.unwrap();

        let info = json!({ "name": "SG" });
        let added = ServerMessage::member_added("presence-c", "U1", info.clone());
        let removed = ServerMessage::member_removed("presence-c", "U1");
        a.increment_presence("presence-c", "U1", &info, &added, Some("1.1")).await.unwrap();
        a.increment_presence("presence-c", "U1", &info, &added, Some("1.2")).await.unwrap();
        a.decrement_presence("presence-c", "U1", &removed).await.unwrap();
        a.decrement_presence("presence-c", "U1", &removed).await.unwrap();
        a.decrement_presence("presence-c", "U1", &removed).await.unwrap();

        while let Ok(message) = b_inbox.try_recv() {
            b.deliver(&message).await;
        }

        let received = recorder.received.lock().await;
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].event, "pusher_internal:member_added");
        assert_eq!(received[0].exclude_socket_id.as_deref(), Some("1.1"));
        assert_eq!(received[0].data, json!({ "user_id": "U1", "user_info": { "name": "SG" } }));
        assert_eq!(received[1].event, "pusher_internal:member_removed");
        assert_eq!(received[1].data, json!({ "user_id": "U1" }));
        assert_eq!(received[1].origin, "gw-a");
    }

    #[tokio::test]
    async fn test_foreign_topic_ignored() {
        let hub = MemoryHub::new();
        let (bridge, _inbox) = create_test_bridge(&hub, "gw-a");
        let recorder = Arc::new(Recorder::default());
        bridge.subscribe_process_to("c", recorder.clone()).await.unwrap();

        bridge
            .deliver(&BrokerMessage {
                topic: "other:channel:c".to_string(),
                payload: r#"{"event":"e","channel":"c"}"#.to_string(),
            })
            .await;
        bridge
            .deliver(&BrokerMessage {
                topic: "test:channel:c".to_string(),
                payload: "not json".to_string(),
            })
            .await;

        assert!(recorder.received.lock().await.is_empty());
    }
}
