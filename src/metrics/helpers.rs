//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    BROKER_MESSAGES_RECEIVED, BROKER_RECONNECTIONS, CHANNELS_ACTIVE, CONNECTIONS_ACTIVE,
    CONNECTIONS_CLOSED, CONNECTIONS_OPENED, MALFORMED_FRAMES, MESSAGES_DELIVERED,
    MESSAGES_DROPPED, MESSAGES_PUBLISHED, PRESENCE_MEMBERS_ADDED, PRESENCE_MEMBERS_REMOVED,
    SUBSCRIPTIONS_REJECTED, SUBSCRIPTIONS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording connection metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        CONNECTIONS_OPENED.inc();
        CONNECTIONS_ACTIVE.inc();
    }

    pub fn record_closed() {
        CONNECTIONS_CLOSED.inc();
        CONNECTIONS_ACTIVE.dec();
    }

    /// Record an inbound frame that failed to parse
    pub fn record_malformed_frame() {
        MALFORMED_FRAMES.inc();
    }
}

/// Helper struct for recording channel metrics
pub struct ChannelMetrics;

impl ChannelMetrics {
    pub fn record_created() {
        CHANNELS_ACTIVE.inc();
    }

    pub fn record_released() {
        CHANNELS_ACTIVE.dec();
    }

    /// Record a successful subscription for a channel kind
    pub fn record_subscribed(kind: &str) {
        SUBSCRIPTIONS_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Record a rejected subscription
    pub fn record_rejected(reason: &str) {
        SUBSCRIPTIONS_REJECTED.with_label_values(&[reason]).inc();
    }
}

/// Helper struct for recording message metrics
pub struct MessageMetrics;

impl MessageMetrics {
    /// Record an event published by the trigger API
    pub fn record_triggered() {
        MESSAGES_PUBLISHED.with_label_values(&["trigger"]).inc();
    }

    /// Record a client event relayed to other subscribers
    pub fn record_client_event() {
        MESSAGES_PUBLISHED.with_label_values(&["client"]).inc();
    }

    /// Record a presence notification
    pub fn record_presence_event() {
        MESSAGES_PUBLISHED.with_label_values(&["presence"]).inc();
    }

    /// Record successful deliveries
    pub fn record_delivered(count: u64) {
        MESSAGES_DELIVERED.inc_by(count);
    }

    /// Record a dropped frame
    pub fn record_dropped() {
        MESSAGES_DROPPED.inc();
    }
}

/// Helper struct for recording presence metrics
pub struct PresenceMetrics;

impl PresenceMetrics {
    pub fn record_member_added() {
        PRESENCE_MEMBERS_ADDED.inc();
    }

    pub fn record_member_removed() {
        PRESENCE_MEMBERS_REMOVED.inc();
    }
}

/// Helper struct for recording broker metrics
pub struct BrokerMetrics;

impl BrokerMetrics {
    pub fn record_message_received() {
        BROKER_MESSAGES_RECEIVED.inc();
    }

    pub fn record_reconnection() {
        BROKER_RECONNECTIONS.inc();
    }
}
