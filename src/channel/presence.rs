//! Presence membership payloads

use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::error::SubscribeError;

/// A user present on a channel, as announced in `channel_data`
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceMember {
    pub user_id: String,
    pub user_info: Value,
}

#[derive(Deserialize)]
struct ChannelData {
    user_id: Value,
    #[serde(default)]
    user_info: Value,
}

impl PresenceMember {
    /// Parse `{user_id, user_info?}`; numeric ids are stringified
    pub fn from_channel_data(raw: &str) -> Result<Self, SubscribeError> {
        let data: ChannelData = serde_json::from_str(raw)
            .map_err(|e| SubscribeError::InvalidChannelData(e.to_string()))?;

        let user_id = match data.user_id {
            Value::String(s) if !s.is_empty() => s,
            Value::Number(n) => n.to_string(),
            _ => {
                return Err(SubscribeError::InvalidChannelData(
                    "user_id must be a non-empty string or a number".to_string(),
                ))
            }
        };

        Ok(Self {
            user_id,
            user_info: data.user_info,
        })
    }
}

/// `subscription_succeeded` payload of a presence channel
pub fn presence_snapshot(members: Vec<(String, Value)>) -> Value {
    let ids: Vec<&str> = members.iter().map(|(id, _)| id.as_str()).collect();
    let hash: Map<String, Value> = members
        .iter()
        .map(|(id, info)| (id.clone(), info.clone()))
        .collect();

    json!({
        "presence": {
            "count": members.len(),
            "ids": ids,
            "hash": hash,
        }
    })
}
