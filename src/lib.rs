// Configuration (client and hub)
pub mod config;

// Shared connection with automatic reconnect
pub mod connection;

// Topic subscriptions multiplexed over the connection
pub mod subscription;

// Server-side fan-out
pub mod hub;

// HTTP and WebSocket APIs of the hub
pub mod api;

pub use config::{ClientConfig, HubConfig, LivewireConfig};
pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus, Endpoint};
pub use subscription::{
    handler, Payload, Scope, SubscribeOptions, SubscriptionHandle, SubscriptionRegistry,
};
