// Infrastructure layer (shared components)
pub mod config;
pub mod error;
pub mod metrics;

// Domain layer (broadcast engine)
pub mod aggregator;
pub mod broadcast;
pub mod registry;
pub mod snapshot;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Dashboard-side client logic
pub mod client;

// Supporting modules
pub mod tasks;
