//! Health of the two Redis links
//!
//! Commands (PUBLISH, presence scripts, roster reads) share one connection;
//! channel topics live on a dedicated subscriber connection. A gateway can
//! only deliver events while the subscriber link is up, so that link decides
//! whether the process is reported as reconnecting.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};

use serde::Serialize;

use super::current_time_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedisHealthStatus {
    Healthy,
    /// Subscriptions flow but commands are failing
    Degraded,
    /// Subscriber link is down; no events are delivered
    Reconnecting,
}

impl RedisHealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedisHealthStatus::Healthy => "healthy",
            RedisHealthStatus::Degraded => "degraded",
            RedisHealthStatus::Reconnecting => "reconnecting",
        }
    }
}

/// Shared by the command pool and the subscriber task
#[derive(Default)]
pub struct RedisHealth {
    commands_failing: AtomicBool,
    subscriber_up: AtomicBool,
    /// Topics the subscriber connection currently holds
    subscribed_topics: AtomicUsize,
    /// When the subscriber last (re)connected and restored its topics
    last_resubscribe_ms: AtomicI64,
    last_resubscribed_topics: AtomicUsize,
    subscriber_drops: AtomicU32,
}

impl RedisHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands_succeeded(&self) {
        self.commands_failing.store(false, Ordering::Release);
    }

    pub fn commands_failed(&self) {
        self.commands_failing.store(true, Ordering::Release);
    }

    /// The subscriber connected and re-issued SUBSCRIBE for `restored_topics`
    pub fn subscriber_connected(&self, restored_topics: usize) {
        self.subscriber_up.store(true, Ordering::Release);
        self.subscribed_topics.store(restored_topics, Ordering::Release);
        self.last_resubscribed_topics
            .store(restored_topics, Ordering::Release);
        self.last_resubscribe_ms
            .store(current_time_ms(), Ordering::Release);
    }

    pub fn subscriber_lost(&self) {
        // Only count the transition, not every failed retry
        if self.subscriber_up.swap(false, Ordering::AcqRel) {
            self.subscriber_drops.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn set_subscribed_topics(&self, topics: usize) {
        self.subscribed_topics.store(topics, Ordering::Release);
    }

    pub fn status(&self) -> RedisHealthStatus {
        if !self.subscriber_up.load(Ordering::Acquire) {
            RedisHealthStatus::Reconnecting
        } else if self.commands_failing.load(Ordering::Acquire) {
            RedisHealthStatus::Degraded
        } else {
            RedisHealthStatus::Healthy
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == RedisHealthStatus::Healthy
    }

    pub fn stats(&self) -> RedisHealthStats {
        RedisHealthStats {
            status: self.status(),
            subscribed_topics: self.subscribed_topics.load(Ordering::Acquire),
            last_resubscribe_ms: self.last_resubscribe_ms.load(Ordering::Acquire),
            last_resubscribed_topics: self.last_resubscribed_topics.load(Ordering::Acquire),
            subscriber_drops: self.subscriber_drops.load(Ordering::Acquire),
        }
    }
}

/// Snapshot served by `/stats`
#[derive(Debug, Clone, Serialize)]
pub struct RedisHealthStats {
    pub status: RedisHealthStatus,
    pub subscribed_topics: usize,
    /// Unix millis, 0 if the subscriber never connected
    pub last_resubscribe_ms: i64,
    pub last_resubscribed_topics: usize,
    pub subscriber_drops: u32,
}
