//! Statistics aggregation backends.
//!
//! The broadcast engine treats the aggregator as a stateless, idempotent
//! dependency: concurrent calls for different guilds are safe, and "no data"
//! is an empty-but-valid snapshot rather than an error.

mod memory;
mod postgres;

pub use memory::MemoryStatsAggregator;
pub use postgres::PostgresStatsAggregator;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use crate::config::DatabaseConfig;
use crate::snapshot::StatsSnapshot;

/// Data-layer failure while building a snapshot. Terminal for the current
/// tick and guild only; the scheduler loop keeps running.
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait StatsAggregator: Send + Sync {
    /// Build a fresh snapshot for one guild.
    async fn get_snapshot(&self, guild_id: u64) -> Result<StatsSnapshot, AggregatorError>;

    /// Backend name for health reporting.
    fn backend_name(&self) -> &'static str;
}

/// Create the aggregator backend from configuration.
///
/// A configured database uses the Postgres backend; without one the service
/// still runs and serves empty snapshots from the memory backend.
pub fn create_aggregator(
    config: &DatabaseConfig,
    pool: Option<PgPool>,
) -> Arc<dyn StatsAggregator> {
    match pool {
        Some(pool) => {
            tracing::info!(
                max_connections = config.max_connections,
                "Using Postgres stats aggregator"
            );
            Arc::new(PostgresStatsAggregator::new(pool))
        }
        None => {
            tracing::warn!("No database configured, using memory stats aggregator");
            Arc::new(MemoryStatsAggregator::new())
        }
    }
}
