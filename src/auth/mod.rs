mod request;
mod signature;

pub use signature::{subscription_preimage, Authenticator};

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("Invalid signature: Expected HMAC SHA256 hex digest of {preimage}, but got {provided}")]
    InvalidSignature { preimage: String, provided: String },

    #[error("Unknown auth_key: {0}")]
    UnknownKey(String),

    #[error("Missing or malformed parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Timestamp expired: {timestamp} is too far from server time {now}")]
    Expired { timestamp: i64, now: i64 },
}

impl AuthError {
    pub fn invalid_signature(preimage: impl Into<String>, provided: impl Into<String>) -> Self {
        Self::InvalidSignature {
            preimage: preimage.into(),
            provided: provided.into(),
        }
    }
}
