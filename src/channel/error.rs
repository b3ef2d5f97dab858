use thiserror::Error;

use crate::auth::AuthError;
use crate::pubsub::BrokerError;

/// Why a subscription was refused; the message is sent to the client
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Invalid channel_data: {0}")]
    InvalidChannelData(String),

    #[error("Subscription is temporarily unavailable, please retry")]
    Broker(#[source] BrokerError),
}

impl SubscribeError {
    /// Short label for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            SubscribeError::Auth(_) => "auth",
            SubscribeError::InvalidChannelData(_) => "channel_data",
            SubscribeError::Broker(_) => "broker",
        }
    }
}

/// Why a client event was not relayed; never reported to the client
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Client events are not allowed on public channels")]
    PublicChannel,

    #[error("Client event names must start with client-")]
    NotClientEvent,

    #[error("Connection is not subscribed to the channel")]
    NotSubscribed,

    #[error("Client event signature rejected")]
    Unauthorized,

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}
