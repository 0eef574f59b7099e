use axum::{routing::get, Router};

use crate::server::AppState;

use super::handlers::{get_snapshot, health, stats};
use super::metrics::prometheus_metrics;

pub fn api_routes(namespace: &str) -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        // HTTP polling fallback
        .route(
            &format!("/{}/snapshot/{{guild_id}}", namespace),
            get(get_snapshot),
        )
}
