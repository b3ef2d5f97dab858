//! A channel as seen by one process
//!
//! Holds the local subscribers, authorizes joins, keeps presence counters in
//! step through the bridge and fans inbound bridge messages out to the local
//! connections.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{Mutex, OnceCell};

use crate::auth::Authenticator;
use crate::connection_manager::Connection;
use crate::metrics::{MessageMetrics, PresenceMetrics};
use crate::pubsub::{
    BridgeMessage, BridgeToken, BrokerError, DeliveryTarget, PubSubBridge, MEMBER_ABSENT,
};
use crate::websocket::{OutboundMessage, ServerMessage, CLIENT_EVENT_PREFIX, MEMBER_ADDED, MEMBER_REMOVED};

use super::error::{RelayError, SubscribeError};
use super::kind::ChannelKind;
use super::presence::{presence_snapshot, PresenceMember};

/// Outcome of [`Channel::subscribe`]
#[derive(Debug)]
pub enum SubscriptionResult {
    Subscribed,
    /// The connection already held the channel; the success reply was re-sent
    AlreadySubscribed,
    Rejected(SubscribeError),
    /// The channel was released concurrently; retry on a fresh one
    Retired,
}

/// What the client subscribed with; re-checked before relaying client events
#[derive(Clone)]
struct Grant {
    auth: String,
    channel_data: Option<String>,
}

/// Membership change carried by a buffered event
enum MemberEvent {
    Added(String),
    Removed(String),
}

impl MemberEvent {
    fn from_message(message: &BridgeMessage) -> Option<Self> {
        let user_id = message.data.get("user_id")?.as_str()?.to_string();
        match message.event.as_str() {
            MEMBER_ADDED => Some(MemberEvent::Added(user_id)),
            MEMBER_REMOVED => Some(MemberEvent::Removed(user_id)),
            _ => None,
        }
    }
}

struct PendingEvent {
    message: OutboundMessage,
    member: Option<MemberEvent>,
}

struct Subscriber {
    connection: Arc<Connection>,
    member: Option<PresenceMember>,
    grant: Option<Grant>,
    /// Events received before the subscription reply was sent
    pending: Option<Vec<PendingEvent>>,
}

#[derive(Default)]
struct ChannelState {
    /// socket_id -> subscriber
    subscribers: HashMap<String, Subscriber>,
    retired: bool,
}

pub struct Channel {
    name: String,
    kind: ChannelKind,
    bridge: Arc<PubSubBridge>,
    authenticator: Arc<Authenticator>,
    state: Mutex<ChannelState>,
    bridge_token: OnceCell<BridgeToken>,
    retired: AtomicBool,
}

impl Channel {
    pub fn new(
        name: impl Into<String>,
        bridge: Arc<PubSubBridge>,
        authenticator: Arc<Authenticator>,
    ) -> Self {
        let name = name.into();
        Self {
            kind: ChannelKind::from_name(&name),
            name,
            bridge,
            authenticator,
            state: Mutex::new(ChannelState::default()),
            bridge_token: OnceCell::new(),
            retired: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.subscribers.len()
    }

    /// Subscribe this process to the channel's broker topic, once
    pub async fn ensure_bridged(self: &Arc<Self>) -> Result<(), BrokerError> {
        if self.is_retired() {
            return Ok(());
        }

        self.bridge_token
            .get_or_try_init(|| {
                let target: Arc<dyn DeliveryTarget> = Arc::clone(self) as Arc<dyn DeliveryTarget>;
                self.bridge.subscribe_process_to(&self.name, target)
            })
            .await?;

        // Released while the broker was confirming
        if self.is_retired() {
            self.unbridge();
        }
        Ok(())
    }

    /// Drop this channel's broker registration
    pub fn unbridge(&self) {
        if let Some(token) = self.bridge_token.get() {
            self.bridge.unsubscribe_process_from(&self.name, *token);
        }
    }

    /// Mark the channel retired if nobody is subscribed.
    ///
    /// Returns true when this call retired it.
    pub async fn retire_if_empty(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.retired || !state.subscribers.is_empty() {
            return false;
        }
        state.retired = true;
        self.retired.store(true, Ordering::Release);
        true
    }

    #[tracing::instrument(
        skip(self, connection, auth, channel_data),
        fields(channel = %self.name, socket_id = %connection.socket_id())
    )]
    pub async fn subscribe(
        &self,
        connection: &Arc<Connection>,
        auth: Option<&str>,
        channel_data: Option<&str>,
    ) -> SubscriptionResult {
        let socket_id = connection.socket_id();

        let (member, grant) = match self.authorize(socket_id, auth, channel_data) {
            Ok(authorized) => authorized,
            Err(e) => {
                tracing::debug!(error = %e, "Subscription rejected");
                return SubscriptionResult::Rejected(e);
            }
        };

        {
            let mut state = self.state.lock().await;
            if state.retired {
                return SubscriptionResult::Retired;
            }
            if state.subscribers.contains_key(socket_id) {
                drop(state);
                return self.resend_success(connection).await;
            }
            state.subscribers.insert(
                socket_id.to_string(),
                Subscriber {
                    connection: Arc::clone(connection),
                    member: member.clone(),
                    grant,
                    pending: Some(Vec::new()),
                },
            );
        }

        if let Some(member) = &member {
            if let Err(e) = self.join_presence(member, socket_id).await {
                tracing::warn!(error = %e, "Presence join failed, rolling back");
                self.state.lock().await.subscribers.remove(socket_id);
                return SubscriptionResult::Rejected(SubscribeError::Broker(e));
            }
        }

        let (payload, mut present) = match self.success_payload().await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read presence roster, rolling back");
                let removed = self.state.lock().await.subscribers.remove(socket_id);
                if let Some(member) = removed.and_then(|s| s.member) {
                    self.leave_presence(&member).await;
                }
                return SubscriptionResult::Rejected(SubscribeError::Broker(e));
            }
        };

        // The reply goes out before anything buffered while joining.
        // Membership events already reflected in the snapshot are dropped.
        let mut state = self.state.lock().await;
        connection.send(ServerMessage::subscription_succeeded(&self.name, payload));
        if let Some(pending) = state
            .subscribers
            .get_mut(socket_id)
            .and_then(|s| s.pending.take())
        {
            for event in pending {
                let news = match &event.member {
                    Some(MemberEvent::Added(user_id)) => present.insert(user_id.clone()),
                    Some(MemberEvent::Removed(user_id)) => present.remove(user_id),
                    None => true,
                };
                if news {
                    connection.send(event.message);
                }
            }
        }

        tracing::debug!(kind = self.kind.as_str(), "Subscribed");
        SubscriptionResult::Subscribed
    }

    /// Remove the connection; returns false if it was not subscribed
    #[tracing::instrument(skip(self, connection), fields(channel = %self.name, socket_id = %connection.socket_id()))]
    pub async fn unsubscribe(&self, connection: &Connection) -> bool {
        let removed = self
            .state
            .lock()
            .await
            .subscribers
            .remove(connection.socket_id());

        let Some(subscriber) = removed else {
            return false;
        };

        if let Some(member) = subscriber.member {
            self.leave_presence(&member).await;
        }

        tracing::debug!("Unsubscribed");
        true
    }

    /// Relay a `client-*` event to every other subscriber in the fleet
    pub async fn relay_client_event(
        &self,
        connection: &Connection,
        event: &str,
        data: Value,
    ) -> Result<(), RelayError> {
        if !self.kind.allows_client_events() {
            return Err(RelayError::PublicChannel);
        }
        if !event.starts_with(CLIENT_EVENT_PREFIX) {
            return Err(RelayError::NotClientEvent);
        }

        let socket_id = connection.socket_id();
        let grant = {
            let state = self.state.lock().await;
            state
                .subscribers
                .get(socket_id)
                .and_then(|s| s.grant.clone())
                .ok_or(RelayError::NotSubscribed)?
        };

        if !self.grant_allows_relay(socket_id, &grant) {
            return Err(RelayError::Unauthorized);
        }

        self.bridge
            .publish(&self.name, event, data, Some(socket_id))
            .await?;
        MessageMetrics::record_client_event();
        Ok(())
    }

    /// Check the signature and decode presence data
    fn authorize(
        &self,
        socket_id: &str,
        auth: Option<&str>,
        channel_data: Option<&str>,
    ) -> Result<(Option<PresenceMember>, Option<Grant>), SubscribeError> {
        let grant = || Grant {
            auth: auth.unwrap_or_default().to_string(),
            channel_data: channel_data.map(str::to_string),
        };

        match self.kind {
            ChannelKind::Public => Ok((None, None)),
            ChannelKind::Private => {
                self.authenticator
                    .check_subscription(socket_id, &self.name, None, auth)?;
                Ok((None, Some(grant())))
            }
            ChannelKind::Presence => {
                self.authenticator
                    .check_subscription(socket_id, &self.name, channel_data, auth)?;
                let member = PresenceMember::from_channel_data(channel_data.unwrap_or_default())?;
                Ok((Some(member), Some(grant())))
            }
        }
    }

    /// Presence signatures cover channel_data, private ones only the socket
    /// and channel
    fn grant_allows_relay(&self, socket_id: &str, grant: &Grant) -> bool {
        match self.kind {
            ChannelKind::Public => false,
            ChannelKind::Private => grant.auth.split_once(':').is_some_and(|(_, signature)| {
                self.authenticator
                    .verify_client_event(socket_id, &self.name, signature)
            }),
            ChannelKind::Presence => self.authenticator.verify_subscription(
                socket_id,
                &self.name,
                grant.channel_data.as_deref(),
                Some(&grant.auth),
            ),
        }
    }

    async fn join_presence(&self, member: &PresenceMember, socket_id: &str) -> Result<(), BrokerError> {
        // Published by the broker together with the count change
        let added = ServerMessage::member_added(&self.name, &member.user_id, member.user_info.clone());
        let count = self
            .bridge
            .increment_presence(&self.name, &member.user_id, &member.user_info, &added, Some(socket_id))
            .await?;

        if count == 1 {
            PresenceMetrics::record_member_added();
            MessageMetrics::record_presence_event();
        }

        tracing::debug!(user_id = %member.user_id, count = count, "Presence joined");
        Ok(())
    }

    async fn leave_presence(&self, member: &PresenceMember) {
        let removed = ServerMessage::member_removed(&self.name, &member.user_id);
        let count = match self
            .bridge
            .decrement_presence(&self.name, &member.user_id, &removed)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, user_id = %member.user_id, "Failed to decrement presence");
                return;
            }
        };

        match count {
            0 => {
                PresenceMetrics::record_member_removed();
                MessageMetrics::record_presence_event();
            }
            MEMBER_ABSENT => {
                tracing::debug!(user_id = %member.user_id, "Presence member already gone");
                return;
            }
            _ => {}
        }

        tracing::debug!(user_id = %member.user_id, count = count, "Presence left");
    }

    /// Reply payload and the user ids it lists
    async fn success_payload(&self) -> Result<(Value, HashSet<String>), BrokerError> {
        match self.kind {
            ChannelKind::Presence => {
                let members = self.bridge.presence_members(&self.name).await?;
                let ids = members.iter().map(|(user_id, _)| user_id.clone()).collect();
                Ok((presence_snapshot(members), ids))
            }
            _ => Ok((json!({}), HashSet::new())),
        }
    }

    async fn resend_success(&self, connection: &Connection) -> SubscriptionResult {
        match self.success_payload().await {
            Ok((payload, _)) => {
                connection.send(ServerMessage::subscription_succeeded(&self.name, payload));
                SubscriptionResult::AlreadySubscribed
            }
            Err(e) => SubscriptionResult::Rejected(SubscribeError::Broker(e)),
        }
    }
}

#[async_trait]
impl DeliveryTarget for Channel {
    async fn deliver(&self, message: &BridgeMessage) {
        let frame = ServerMessage::new(
            message.event.as_str(),
            Some(&self.name),
            message.data.clone(),
        );
        // Serialized once for every recipient
        let outbound = match serde_json::to_string(&frame) {
            Ok(text) => OutboundMessage::Serialized(text.into()),
            Err(e) => {
                tracing::warn!(error = %e, channel = %self.name, "Failed to serialize event");
                return;
            }
        };

        let excluded = message.exclude_socket_id.as_deref();
        let mut delivered = 0;

        let mut state = self.state.lock().await;
        for (socket_id, subscriber) in state.subscribers.iter_mut() {
            if excluded == Some(socket_id.as_str()) {
                continue;
            }
            match subscriber.pending.as_mut() {
                Some(pending) => pending.push(PendingEvent {
                    message: outbound.clone(),
                    member: MemberEvent::from_message(message),
                }),
                None => {
                    if subscriber.connection.send(outbound.clone()) {
                        delivered += 1;
                    }
                }
            }
        }

        MessageMetrics::record_delivered(delivered);
        tracing::trace!(
            channel = %self.name,
            event = %message.event,
            delivered = delivered,
            "Delivered bridge message"
        );
    }
}
