//! HTTP surface: snapshot polling fallback, health, stats and metrics.

mod handlers;
mod metrics;
mod routes;

pub use handlers::{get_snapshot, health, stats};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
