//! In-process broker
//!
//! A [`MemoryHub`] plays the role of the shared broker; every
//! [`MemoryBroker`] connected to it behaves like a separate gateway process
//! with its own inbox. Single-node deployments connect one broker, tests
//! connect several to exercise cross-process fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::traits::Broker;
use super::types::{
    BrokerBackend, BrokerError, BrokerMessage, PresenceChange, SubscribeAck, MEMBER_ABSENT,
};

#[derive(Debug)]
struct RosterEntry {
    user_id: String,
    user_info: String,
    count: i64,
}

/// Shared state standing in for the broker server
#[derive(Default)]
pub struct MemoryHub {
    /// topic -> node -> inbox
    subscriptions: DashMap<String, HashMap<u64, mpsc::UnboundedSender<BrokerMessage>>>,
    /// presence key -> members in join order
    rosters: DashMap<String, Vec<RosterEntry>>,
    next_node: AtomicU64,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a new node and return its broker handle and inbox
    pub fn connect(self: &Arc<Self>) -> (MemoryBroker, mpsc::UnboundedReceiver<BrokerMessage>) {
        let (inbox, rx) = mpsc::unbounded_channel();
        let broker = MemoryBroker {
            hub: Arc::clone(self),
            node_id: self.next_node.fetch_add(1, Ordering::Relaxed),
            inbox,
        };
        (broker, rx)
    }

    /// Number of topics with at least one subscribed node
    pub fn topic_count(&self) -> usize {
        self.subscriptions.len()
    }

    fn dispatch(&self, topic: &str, payload: &str) {
        // Exclusive access keeps per-topic order identical for every node
        if let Some(mut nodes) = self.subscriptions.get_mut(topic) {
            nodes.retain(|_, inbox| {
                inbox
                    .send(BrokerMessage {
                        topic: topic.to_string(),
                        payload: payload.to_string(),
                    })
                    .is_ok()
            });
        }
    }
}

/// One node's handle on a [`MemoryHub`]
pub struct MemoryBroker {
    hub: Arc<MemoryHub>,
    node_id: u64,
    inbox: mpsc::UnboundedSender<BrokerMessage>,
}

#[async_trait]
impl Broker for MemoryBroker {
    fn backend_type(&self) -> BrokerBackend {
        BrokerBackend::Memory
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError> {
        self.hub.dispatch(topic, &payload);
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<SubscribeAck, BrokerError> {
        self.hub
            .subscriptions
            .entry(topic.to_string())
            .or_default()
            .insert(self.node_id, self.inbox.clone());
        Ok(SubscribeAck::ready())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError> {
        if let Entry::Occupied(mut entry) = self.hub.subscriptions.entry(topic.to_string()) {
            entry.get_mut().remove(&self.node_id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
        Ok(())
    }

    async fn adjust_member(&self, change: PresenceChange<'_>) -> Result<i64, BrokerError> {
        // The roster guard is held while announcing
        let mut roster = self.hub.rosters.entry(change.key.to_string()).or_default();
        let position = roster.iter().position(|m| m.user_id == change.user_id);
        let count = position.map_or(0, |i| roster[i].count) + change.delta;

        if count <= 0 {
            let result = match position {
                Some(i) => {
                    roster.remove(i);
                    self.hub.dispatch(change.topic, change.announcement);
                    0
                }
                None => MEMBER_ABSENT,
            };
            let empty = roster.is_empty();
            drop(roster);
            if empty {
                self.hub.rosters.remove_if(change.key, |_, r| r.is_empty());
            }
            return Ok(result);
        }

        match position {
            Some(i) => {
                roster[i].count = count;
                match change.user_info {
                    Some(info) if change.delta > 0 => roster[i].user_info = info.to_string(),
                    _ => {}
                }
            }
            None => {
                roster.push(RosterEntry {
                    user_id: change.user_id.to_string(),
                    user_info: change.user_info.unwrap_or("null").to_string(),
                    count,
                });
                self.hub.dispatch(change.topic, change.announcement);
            }
        }

        Ok(count)
    }

    async fn members(&self, key: &str) -> Result<Vec<(String, String)>, BrokerError> {
        Ok(self
            .hub
            .rosters
            .get(key)
            .map(|roster| {
                roster
                    .iter()
                    .map(|m| (m.user_id.clone(), m.user_info.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl Drop for MemoryBroker {
    fn drop(&mut self) {
        let node_id = self.node_id;
        self.hub.subscriptions.retain(|_, nodes| {
            nodes.remove(&node_id);
            !nodes.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribed_nodes_only() {
        let hub = MemoryHub::new();
        let (a, mut a_rx) = hub.connect();
        let (b, mut b_rx) = hub.connect();

        a.subscribe("t").unwrap().confirmed().await.unwrap();
        b.publish("t", "one".to_string()).await.unwrap();
        b.publish("other", "two".to_string()).await.unwrap();

        assert_eq!(a_rx.recv().await.unwrap().payload, "one");
        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_and_drop_clean_up() {
        let hub = MemoryHub::new();
        let (a, _a_rx) = hub.connect();
        let (b, _b_rx) = hub.connect();

        a.subscribe("t").unwrap().confirmed().await.unwrap();
        b.subscribe("t").unwrap().confirmed().await.unwrap();
        a.unsubscribe("t").unwrap();
        assert_eq!(hub.topic_count(), 1);

        drop(b);
        assert_eq!(hub.topic_count(), 0);
    }

    fn change<'a>(user_id: &'a str, delta: i64, user_info: Option<&'a str>) -> PresenceChange<'a> {
        PresenceChange {
            key: "p",
            user_id,
            delta,
            user_info,
            topic: "t",
            announcement: user_id,
        }
    }

    #[tokio::test]
    async fn test_adjust_member_transitions() {
        let hub = MemoryHub::new();
        let (broker, _rx) = hub.connect();

        assert_eq!(broker.adjust_member(change("U1", 1, Some(r#"{"n":1}"#))).await.unwrap(), 1);
        assert_eq!(broker.adjust_member(change("U1", 1, Some(r#"{"n":1}"#))).await.unwrap(), 2);
        assert_eq!(broker.adjust_member(change("U2", 1, None)).await.unwrap(), 1);

        let members = broker.members("p").await.unwrap();
        assert_eq!(
            members,
            vec![
                ("U1".to_string(), r#"{"n":1}"#.to_string()),
                ("U2".to_string(), "null".to_string()),
            ]
        );

        assert_eq!(broker.adjust_member(change("U1", -1, None)).await.unwrap(), 1);
        assert_eq!(broker.adjust_member(change("U1", -1, None)).await.unwrap(), 0);
        assert_eq!(broker.members("p").await.unwrap().len(), 1);

        assert_eq!(broker.adjust_member(change("U9", -1, None)).await.unwrap(), MEMBER_ABSENT);
        assert_eq!(broker.members("p").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_announcements_only_on_transitions() {
        let hub = MemoryHub::new();
        let (broker, mut rx) = hub.connect();
        broker.subscribe("t").unwrap().confirmed().await.unwrap();

        broker.adjust_member(change("U1", 1, None)).await.unwrap();
        broker.adjust_member(change("U1", 1, None)).await.unwrap();
        broker.adjust_member(change("U1", -1, None)).await.unwrap();
        broker.adjust_member(change("U1", -1, None)).await.unwrap();
        broker.adjust_member(change("U1", -1, None)).await.unwrap();

        assert_eq!(rx.try_recv().unwrap().payload, "U1");
        assert_eq!(rx.try_recv().unwrap().payload, "U1");
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.rosters.len(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_handoff_keeps_announcement_order() {
        let hub = MemoryHub::new();
        let (observer, mut rx) = hub.connect();
        observer.subscribe("t").unwrap().confirmed().await.unwrap();
        let leaving = Arc::new(hub.connect().0);
        let joining = Arc::new(hub.connect().0);
        leaving
            .adjust_member(PresenceChange { announcement: "added", ..change("U1", 1, None) })
            .await
            .unwrap();

        let a = tokio::spawn({
            let broker = Arc::clone(&leaving);
            async move {
                broker
                    .adjust_member(PresenceChange { announcement: "removed", ..change("U1", -1, None) })
                    .await
                    .unwrap()
            }
        });
        let b = tokio::spawn({
            let broker = Arc::clone(&joining);
            async move {
                broker
                    .adjust_member(PresenceChange { announcement: "added", ..change("U1", 1, None) })
                    .await
                    .unwrap()
            }
        });
        a.await.unwrap();
        b.await.unwrap();

        // Whatever the interleaving, the last announcement matches the roster
        let mut last = None;
        while let Ok(message) = rx.try_recv() {
            last = Some(message.payload);
        }
        let present = !observer.members("p").await.unwrap().is_empty();
        assert_eq!(last.as_deref(), Some(if present { "added" } else { "removed" }));
    }

    #[tokio::test]
    async fn test_concurrent_increments_see_one_transition() {
        let hub = MemoryHub::new();
        let brokers: Vec<_> = (0..10).map(|_| Arc::new(hub.connect().0)).collect();

        let handles: Vec<_> = brokers
            .iter()
            .cloned()
            .map(|b| tokio::spawn(async move { b.adjust_member(change("U1", 1, None)).await.unwrap() }))
            .collect();

        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap());
        }
        counts.sort();
        assert_eq!(counts, (1..=10).collect::<Vec<i64>>());
    }
}
