use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::api::api_routes;
use crate::websocket::ws_handler;

use super::AppState;

pub fn create_app(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let namespace = state.settings.realtime.namespace.clone();

    Router::new()
        // WebSocket endpoint
        .route(
            &format!("/{}/ws/{{guild_id}}/{{client_id}}", namespace),
            get(ws_handler),
        )
        // Merge API routes
        .merge(api_routes(&namespace))
        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Add state
        .with_state(state)
}
