//! Request and response models for the trigger API

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

/// Channels a single trigger request may target
pub const MAX_TRIGGER_CHANNELS: usize = 100;

/// Body of `POST /apps/{app_id}/events`
#[derive(Debug, Deserialize)]
pub struct TriggerEventRequest {
    /// Event name
    pub name: String,
    /// Payload, usually a JSON-encoded string
    #[serde(default)]
    pub data: Value,
    /// Single target channel
    pub channel: Option<String>,
    /// Target channels
    #[serde(default)]
    pub channels: Vec<String>,
    /// Socket that must not receive the event
    pub socket_id: Option<String>,
}

impl TriggerEventRequest {
    /// Every distinct target channel, validated
    pub fn target_channels(&self) -> Result<Vec<String>, AppError> {
        if self.name.is_empty() {
            return Err(AppError::Validation("Event name is required".to_string()));
        }

        let mut channels: Vec<String> = Vec::with_capacity(self.channels.len() + 1);
        for channel in self.channel.iter().chain(self.channels.iter()) {
            if channel.is_empty() {
                return Err(AppError::Validation("Channel names must not be empty".to_string()));
            }
            if !channels.contains(channel) {
                channels.push(channel.clone());
            }
        }

        match channels.len() {
            0 => Err(AppError::Validation("At least one channel is required".to_string())),
            n if n > MAX_TRIGGER_CHANNELS => Err(AppError::Validation(format!(
                "At most {} channels per request",
                MAX_TRIGGER_CHANNELS
            ))),
            _ => Ok(channels),
        }
    }
}

/// Pusher answers successful triggers with an empty object
#[derive(Debug, Serialize)]
pub struct TriggerEventResponse {}
