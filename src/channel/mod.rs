//! Channels: public, private and presence
//!
//! A [`Channel`] tracks the subscribers of one channel on this process; the
//! [`ChannelManager`] creates channels on first use and releases them when
//! their last local subscriber leaves.

mod error;
mod kind;
mod presence;
mod registry;
mod types;

pub use error::{RelayError, SubscribeError};
pub use kind::ChannelKind;
pub use presence::{presence_snapshot, PresenceMember};
pub use registry::{ChannelManager, ChannelStats};
pub use types::{Channel, SubscriptionResult};
