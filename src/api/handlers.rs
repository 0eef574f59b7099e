//! Health, stats and snapshot-fallback endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::broadcast::BroadcasterStatsSnapshot;
use crate::error::{AppError, Result};
use crate::registry::RegistryStats;
use crate::server::AppState;
use crate::snapshot::StatsSnapshot;
use crate::websocket::is_valid_guild_id;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub aggregator: AggregatorHealthResponse,
    pub connections: ConnectionHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct AggregatorHealthResponse {
    pub backend: String,
}

#[derive(Debug, Serialize)]
pub struct ConnectionHealthResponse {
    pub sessions: usize,
    pub guilds: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub registry: RegistryStats,
    pub broadcaster: BroadcasterStatsSnapshot,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.registry.stats();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        aggregator: AggregatorHealthResponse {
            backend: state.aggregator.backend_name().to_string(),
        },
        connections: ConnectionHealthResponse {
            sessions: registry.total_sessions,
            guilds: registry.active_guilds,
        },
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        registry: state.registry.stats(),
        broadcaster: state.broadcaster.stats(),
    })
}

/// GET /{namespace}/snapshot/{guild_id} - HTTP polling fallback.
///
/// Returns the same snapshot JSON shape as the WebSocket data envelopes, for
/// clients whose persistent transport cannot be established.
pub async fn get_snapshot(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
) -> Result<Json<StatsSnapshot>> {
    let guild_id: u64 = guild_id
        .parse()
        .map_err(|_| AppError::Validation(format!("invalid guild id: {}", guild_id)))?;

    if !is_valid_guild_id(guild_id) {
        return Err(AppError::Validation("invalid guild id".to_string()));
    }

    let snapshot = state.aggregator.get_snapshot(guild_id).await?;
    Ok(Json(snapshot))
}
