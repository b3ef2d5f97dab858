//! HTTP event triggers
//!
//! Trusted backends publish events through the Pusher REST API:
//! - `POST /apps/{app_id}/events` (one event, one or more channels)
//! - `POST /apps/{app_id}/channels/{channel}/events` (legacy, raw body)

mod http;
mod models;

pub use http::{trigger_channel_event, trigger_events};
pub use models::{TriggerEventRequest, TriggerEventResponse, MAX_TRIGGER_CHANNELS};
