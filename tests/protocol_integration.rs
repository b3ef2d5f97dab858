//! Protocol integration tests
//!
//! Several gateway nodes share one memory broker hub, so subscribers of the
//! same channel are spread across processes exactly as in a Redis deployment.

mod common;

use serde_json::json;

use common::{count_events, Node};
use pusher_gateway::pubsub::MemoryHub;

// =============================================================================
// Presence
// =============================================================================

mod presence_tests {
    use super::*;

    #[tokio::test]
    async fn test_presence_snapshot_and_member_added_across_nodes() {
        let hub = MemoryHub::new();
        let node_a = Node::spawn(&hub);
        let node_b = Node::spawn(&hub);

        let mut a = node_a.connect().await;
        let reply = a
            .subscribe_presence("presence-channel", "U1", json!({ "name": "SG" }))
            .await;
        assert_eq!(reply["event"], "pusher_internal:subscription_succeeded");
        assert_eq!(reply["channel"], "presence-channel");
        assert_eq!(
            reply["data"],
            json!({
                "presence": {
                    "count": 1,
                    "ids": ["U1"],
                    "hash": { "U1": { "name": "SG" } },
                }
            })
        );

        let mut b = node_b.connect().await;
        let reply = b
            .subscribe_presence("presence-channel", "U2", json!({ "name": "CHROME" }))
            .await;
        assert_eq!(reply["data"]["presence"]["count"], 2);
        assert_eq!(reply["data"]["presence"]["hash"]["U1"], json!({ "name": "SG" }));

        let added = a.next().await;
        assert_eq!(added["event"], "pusher_internal:member_added");
        assert_eq!(added["channel"], "presence-channel");
        assert_eq!(
            added["data"],
            json!({ "user_id": "U2", "user_info": { "name": "CHROME" } })
        );

        // The joiner never hears about itself
        assert!(b.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_many_tabs_of_one_user_announce_once() {
        let hub = MemoryHub::new();
        let nodes = [Node::spawn(&hub), Node::spawn(&hub)];

        let mut a = nodes[0].connect().await;
        a.subscribe_presence("presence-channel", "U1", json!({ "name": "SG" }))
            .await;

        let mut tabs = Vec::new();
        for i in 0..10 {
            let mut tab = nodes[i % 2].connect().await;
            let reply = tab
                .subscribe_presence("presence-channel", "U2", json!({ "name": "CHROME" }))
                .await;
            assert_eq!(reply["event"], "pusher_internal:subscription_succeeded");
            assert_eq!(reply["data"]["presence"]["count"], 2);
            tabs.push(tab);
        }

        for tab in &tabs {
            tab.close().await;
        }

        let frames = a.drain().await;
        assert_eq!(count_events(&frames, "pusher_internal:member_added"), 1);
        assert_eq!(count_events(&frames, "pusher_internal:member_removed"), 1);

        let removed = frames
            .iter()
            .find(|f| f["event"] == "pusher_internal:member_removed")
            .unwrap();
        assert_eq!(removed["data"], json!({ "user_id": "U2" }));
    }

    #[tokio::test]
    async fn test_concurrent_tabs_announce_once() {
        let hub = MemoryHub::new();
        let nodes = [Node::spawn(&hub), Node::spawn(&hub), Node::spawn(&hub)];

        let mut a = nodes[0].connect().await;
        a.subscribe_presence("presence-room", "U1", json!({})).await;

        let mut tabs = Vec::new();
        for i in 0..9 {
            tabs.push(nodes[i % 3].connect().await);
        }

        let joins: Vec<_> = tabs
            .into_iter()
            .map(|mut tab| {
                tokio::spawn(async move {
                    tab.subscribe_presence("presence-room", "U2", json!({})).await;
                    tab
                })
            })
            .collect();

        let mut tabs = Vec::new();
        for join in joins {
            tabs.push(join.await.unwrap());
        }

        let closes: Vec<_> = tabs
            .into_iter()
            .map(|tab| tokio::spawn(async move { tab.close().await }))
            .collect();
        for close in closes {
            close.await.unwrap();
        }

        let frames = a.drain().await;
        assert_eq!(count_events(&frames, "pusher_internal:member_added"), 1);
        assert_eq!(count_events(&frames, "pusher_internal:member_removed"), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_announces_member_removed() {
        let hub = MemoryHub::new();
        let node = Node::spawn(&hub);

        let mut a = node.connect().await;
        a.subscribe_presence("presence-room", "U1", json!({})).await;
        let mut b = node.connect().await;
        b.subscribe_presence("presence-room", "U2", json!({})).await;
        assert_eq!(a.next().await["event"], "pusher_internal:member_added");

        b.send(json!({ "event": "pusher:unsubscribe", "data": { "channel": "presence-room" } }))
            .await;

        let removed = a.next().await;
        assert_eq!(removed["event"], "pusher_internal:member_removed");
        assert_eq!(removed["data"]["user_id"], "U2");
    }
}

// =============================================================================
// Authorization
// =============================================================================

mod auth_tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_signature_keeps_connection_open() {
        let hub = MemoryHub::new();
        let node = Node::spawn(&hub);
        let mut client = node.connect().await;

        client
            .send(json!({
                "event": "pusher:subscribe",
                "data": { "channel": "private-channel", "auth": format!("{}:deadbeef", crate::common::APP_KEY) },
            }))
            .await;

        let error = client.next().await;
        assert_eq!(error["event"], "pusher:error");
        assert!(error["data"]["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid signature: Expected HMAC SHA256 hex digest of"));

        // Still usable afterwards
        let reply = client.subscribe_private("private-channel").await;
        assert_eq!(reply["event"], "pusher_internal:subscription_succeeded");
    }

    #[tokio::test]
    async fn test_presence_signature_covers_channel_data() {
        let hub = MemoryHub::new();
        let node = Node::spawn(&hub);
        let mut client = node.connect().await;

        let signed = json!({ "user_id": "U1" }).to_string();
        let auth = node
            .state
            .authenticator
            .subscription_token(client.socket_id(), "presence-room", Some(&signed));

        client
            .send(json!({
                "event": "pusher:subscribe",
                "data": {
                    "channel": "presence-room",
                    "auth": auth,
                    "channel_data": json!({ "user_id": "U2" }).to_string(),
                },
            }))
            .await;

        assert_eq!(client.next().await["event"], "pusher:error");
    }
}

// =============================================================================
// Events
// =============================================================================

mod event_tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_fans_out_across_nodes() {
        let hub = MemoryHub::new();
        let node_a = Node::spawn(&hub);
        let node_b = Node::spawn(&hub);

        let mut a = node_a.connect().await;
        let mut b = node_b.connect().await;
        a.subscribe_public("MY_CHANNEL").await;
        b.subscribe_public("MY_CHANNEL").await;

        node_b
            .state
            .channel_manager
            .trigger("MY_CHANNEL", "an_event", json!("some stuff"), None)
            .await
            .unwrap();

        for client in [&mut a, &mut b] {
            let frame = client.next().await;
            assert_eq!(frame["event"], "an_event");
            assert_eq!(frame["channel"], "MY_CHANNEL");
            assert_eq!(frame["data"], "some stuff");
        }
    }

    #[tokio::test]
    async fn test_trigger_excludes_socket() {
        let hub = MemoryHub::new();
        let node = Node::spawn(&hub);
        let remote = Node::spawn(&hub);

        let mut a = node.connect().await;
        let mut b = node.connect().await;
        let mut c = remote.connect().await;
        for client in [&mut a, &mut b, &mut c] {
            client.subscribe_public("MY_CHANNEL").await;
        }

        let excluded = a.socket_id().to_string();
        node.state
            .channel_manager
            .trigger("MY_CHANNEL", "an_event", json!({}), Some(&excluded))
            .await
            .unwrap();

        assert_eq!(b.next().await["event"], "an_event");
        assert_eq!(c.next().await["event"], "an_event");
        assert!(a.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_client_events_skip_sender() {
        let hub = MemoryHub::new();
        let node_a = Node::spawn(&hub);
        let node_b = Node::spawn(&hub);

        let mut a = node_a.connect().await;
        let mut b = node_b.connect().await;
        a.subscribe_private("private-chat").await;
        b.subscribe_private("private-chat").await;

        a.send(json!({
            "event": "client-typing",
            "channel": "private-chat",
            "data": { "user": "a" },
        }))
        .await;

        let frame = b.next().await;
        assert_eq!(frame["event"], "client-typing");
        assert_eq!(frame["channel"], "private-chat");
        assert_eq!(frame["data"], json!({ "user": "a" }));
        assert!(a.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_client_events_on_public_channel_are_dropped() {
        let hub = MemoryHub::new();
        let node = Node::spawn(&hub);

        let mut a = node.connect().await;
        let mut b = node.connect().await;
        a.subscribe_public("MY_CHANNEL").await;
        b.subscribe_public("MY_CHANNEL").await;

        a.send(json!({ "event": "client-typing", "channel": "MY_CHANNEL", "data": {} }))
            .await;

        assert!(a.drain().await.is_empty());
        assert!(b.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_client_events_require_subscription() {
        let hub = MemoryHub::new();
        let node = Node::spawn(&hub);

        let mut member = node.connect().await;
        let mut outsider = node.connect().await;
        member.subscribe_private("private-chat").await;

        outsider
            .send(json!({ "event": "client-typing", "channel": "private-chat", "data": {} }))
            .await;

        assert!(member.drain().await.is_empty());
        assert!(outsider.drain().await.is_empty());
    }
}

// =============================================================================
// Framing
// =============================================================================

mod framing_tests {
    use super::*;

    #[tokio::test]
    async fn test_malformed_frames_are_dropped_silently() {
        let hub = MemoryHub::new();
        let node = Node::spawn(&hub);
        let mut client = node.connect().await;

        client.send_text("not json at all").await;
        client.send_text(r#"{"event":"pusher:subscribe","data":{}}"#).await;
        client.send_text(r#"{"no_event":true}"#).await;
        assert!(client.drain().await.is_empty());
        assert!(!client.connection.is_closed());

        client.send(json!({ "event": "pusher:ping", "data": {} })).await;
        assert_eq!(client.next().await["event"], "pusher:pong");
    }

    #[tokio::test]
    async fn test_close_releases_channels() {
        let hub = MemoryHub::new();
        let node = Node::spawn(&hub);

        let mut a = node.connect().await;
        a.subscribe_public("MY_CHANNEL").await;
        a.subscribe_private("private-x").await;
        assert_eq!(node.state.channel_manager.channel_count(), 2);
        assert_eq!(hub.topic_count(), 2);

        a.close().await;
        assert_eq!(node.state.channel_manager.channel_count(), 0);
        assert_eq!(node.state.connection_manager.count(), 0);
        assert_eq!(hub.topic_count(), 0);
    }
}
