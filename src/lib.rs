// Shared components
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod redis;

// Domain layer
pub mod channel;
pub mod connection_manager;
pub mod pubsub;

// Application layer
pub mod api;
pub mod server;
pub mod triggers;
pub mod websocket;
