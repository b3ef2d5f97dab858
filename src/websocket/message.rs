//! Pusher protocol frames
//!
//! Every frame is a JSON object `{event, channel?, data}`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
pub const SUBSCRIBE: &str = "pusher:subscribe";
pub const UNSUBSCRIBE: &str = "pusher:unsubscribe";
pub const PING: &str = "pusher:ping";
pub const PONG: &str = "pusher:pong";
pub const ERROR: &str = "pusher:error";
pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
pub const MEMBER_ADDED: &str = "pusher_internal:member_added";
pub const MEMBER_REMOVED: &str = "pusher_internal:member_removed";

/// Prefix every client-originated event must carry
pub const CLIENT_EVENT_PREFIX: &str = "client-";

/// Error code sent when a socket connects with an unknown app key
pub const ERROR_APP_NOT_FOUND: u16 = 4001;

/// Frame received from a client
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl ClientFrame {
    /// `data` as an object; some clients send it JSON-encoded as a string
    pub fn data_object(&self) -> Value {
        match &self.data {
            Value::String(s) => serde_json::from_str(s).unwrap_or(Value::Null),
            other => other.clone(),
        }
    }

    pub fn is_client_event(&self) -> bool {
        self.event.starts_with(CLIENT_EVENT_PREFIX)
    }
}

/// Payload of `pusher:subscribe`
#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeRequest {
    pub channel: String,
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub channel_data: Option<Value>,
}

impl SubscribeRequest {
    /// channel_data exactly as the client supplied it
    pub fn channel_data_raw(&self) -> Option<String> {
        match &self.channel_data {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

/// Payload of `pusher:unsubscribe`
#[derive(Debug, Clone, Deserialize)]
pub struct UnsubscribeRequest {
    pub channel: String,
}

/// Frame sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub data: Value,
}

impl ServerMessage {
    pub fn new(event: impl Into<String>, channel: Option<&str>, data: Value) -> Self {
        Self {
            event: event.into(),
            channel: channel.map(str::to_string),
            data,
        }
    }

    pub fn connection_established(socket_id: &str, activity_timeout: u64) -> Self {
        Self::new(
            CONNECTION_ESTABLISHED,
            None,
            json!({ "socket_id": socket_id, "activity_timeout": activity_timeout }),
        )
    }

    pub fn subscription_succeeded(channel: &str, data: Value) -> Self {
        Self::new(SUBSCRIPTION_SUCCEEDED, Some(channel), data)
    }

    pub fn member_added(channel: &str, user_id: &str, user_info: Value) -> Self {
        Self::new(
            MEMBER_ADDED,
            Some(channel),
            json!({ "user_id": user_id, "user_info": user_info }),
        )
    }

    pub fn member_removed(channel: &str, user_id: &str) -> Self {
        Self::new(MEMBER_REMOVED, Some(channel), json!({ "user_id": user_id }))
    }

    pub fn pong() -> Self {
        Self::new(PONG, None, json!({}))
    }

    pub fn error(code: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        let data = match code {
            Some(code) => json!({ "code": code, "message": message }),
            None => json!({ "message": message }),
        };
        Self::new(ERROR, None, data)
    }
}

/// Message queued on a connection's send path
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Serialized when written to the socket
    Raw(ServerMessage),
    /// Serialized once and shared by every recipient of a fan-out
    Serialized(Arc<str>),
}

impl OutboundMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Raw(message) => serde_json::to_string(message),
            Self::Serialized(text) => Ok(text.to_string()),
        }
    }
}

impl From<ServerMessage> for OutboundMessage {
    fn from(message: ServerMessage) -> Self {
        Self::Raw(message)
    }
}
