//! Prometheus metrics for the gateway.
//!
//! - Connection metrics (opened, closed, active)
//! - Channel metrics (subscriptions, auth failures)
//! - Message metrics (published, delivered, dropped)
//! - Presence metrics (member transitions)
//! - Broker metrics (messages received, reconnects)

mod helpers;

pub use helpers::{
    encode_metrics, BrokerMetrics, ChannelMetrics, ConnectionMetrics, MessageMetrics,
    PresenceMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "pusher_gateway";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Total number of active WebSocket connections on this process
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of active WebSocket connections"
    ).unwrap();

    /// Total WebSocket connections opened
    pub static ref CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    /// Total WebSocket connections closed
    pub static ref CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    // ============================================================================
    // Channel Metrics
    // ============================================================================

    /// Channels with at least one local subscriber
    pub static ref CHANNELS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_channels_active", METRIC_PREFIX),
        "Number of channels with local subscribers"
    ).unwrap();

    /// Subscriptions by channel kind
    pub static ref SUBSCRIPTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_subscriptions_total", METRIC_PREFIX),
        "Total successful subscriptions",
        &["kind"]
    ).unwrap();

    /// Rejected subscriptions by reason
    pub static ref SUBSCRIPTIONS_REJECTED: IntCounterVec = register_int_counter_vec!(
        format!("{}_subscriptions_rejected_total", METRIC_PREFIX),
        "Total rejected subscriptions",
        &["reason"]
    ).unwrap();

    // ============================================================================
    // Message Metrics
    // ============================================================================

    /// Messages published to the broker by source
    pub static ref MESSAGES_PUBLISHED: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_published_total", METRIC_PREFIX),
        "Total messages published to the broker",
        &["source"]
    ).unwrap();

    /// Frames handed to local connections
    pub static ref MESSAGES_DELIVERED: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Total frames delivered to local connections"
    ).unwrap();

    /// Frames dropped because a connection's buffer was full or closed
    pub static ref MESSAGES_DROPPED: IntCounter = register_int_counter!(
        format!("{}_messages_dropped_total", METRIC_PREFIX),
        "Total frames dropped on slow or closed connections"
    ).unwrap();

    /// Inbound frames that were not valid JSON
    pub static ref MALFORMED_FRAMES: IntCounter = register_int_counter!(
        format!("{}_malformed_frames_total", METRIC_PREFIX),
        "Total inbound frames dropped as malformed"
    ).unwrap();

    // ============================================================================
    // Presence Metrics
    // ============================================================================

    /// member_added broadcasts
    pub static ref PRESENCE_MEMBERS_ADDED: IntCounter = register_int_counter!(
        format!("{}_presence_members_added_total", METRIC_PREFIX),
        "Total presence member_added broadcasts"
    ).unwrap();

    /// member_removed broadcasts
    pub static ref PRESENCE_MEMBERS_REMOVED: IntCounter = register_int_counter!(
        format!("{}_presence_members_removed_total", METRIC_PREFIX),
        "Total presence member_removed broadcasts"
    ).unwrap();

    // ============================================================================
    // Broker Metrics
    // ============================================================================

    /// Messages received from the broker
    pub static ref BROKER_MESSAGES_RECEIVED: IntCounter = register_int_counter!(
        format!("{}_broker_messages_received_total", METRIC_PREFIX),
        "Total messages received from the broker"
    ).unwrap();

    /// Broker subscriber reconnection attempts
    pub static ref BROKER_RECONNECTIONS: IntCounter = register_int_counter!(
        format!("{}_broker_reconnections_total", METRIC_PREFIX),
        "Total broker subscriber reconnection attempts"
    ).unwrap();
}
