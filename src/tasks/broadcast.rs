//! Periodic broadcast scheduler.
//!
//! A single interval-driven task walks every guild that currently has
//! subscribers and triggers one fan-out per guild. An aggregator failure
//! skips that guild for the tick; the loop itself never stops on data-layer
//! errors.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::broadcast::{SnapshotBroadcaster, UpdateKind};
use crate::config::RealtimeConfig;
use crate::metrics::{AGGREGATOR_ERRORS_TOTAL, BROADCAST_ROUNDS_TOTAL, BROADCAST_ROUND_DURATION};
use crate::registry::SubscriptionRegistry;

pub struct BroadcastTask {
    config: RealtimeConfig,
    broadcaster: Arc<SnapshotBroadcaster>,
    registry: Arc<SubscriptionRegistry>,
    shutdown: broadcast::Receiver<()>,
}

impl BroadcastTask {
    pub fn new(
        config: RealtimeConfig,
        broadcaster: Arc<SnapshotBroadcaster>,
        registry: Arc<SubscriptionRegistry>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            broadcaster,
            registry,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let interval = Duration::from_secs(self.config.broadcast_interval);
        let mut timer = tokio::time::interval(interval);

        // Subscribers already got initial_data on subscribe; skip the
        // immediate first tick.
        timer.tick().await;

        tracing::info!(
            broadcast_interval_secs = self.config.broadcast_interval,
            "Broadcast task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Broadcast task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.broadcast_round().await;
                }
            }
        }

        tracing::info!("Broadcast task stopped");
    }

    /// One tick: fan out a fresh snapshot to every guild with subscribers.
    async fn broadcast_round(&self) {
        let guilds = self.registry.active_guilds();
        if guilds.is_empty() {
            return;
        }

        let start = std::time::Instant::now();
        BROADCAST_ROUNDS_TOTAL.inc();

        let mut delivered = 0;
        let mut failed = 0;
        for guild_id in guilds {
            match self
                .broadcaster
                .broadcast_guild(guild_id, UpdateKind::Scheduled)
                .await
            {
                Ok(report) => {
                    delivered += report.delivered;
                    failed += report.failed;
                }
                Err(e) => {
                    // Better to skip this guild than to push partial data.
                    AGGREGATOR_ERRORS_TOTAL.inc();
                    tracing::warn!(
                        guild_id = guild_id,
                        error = %e,
                        "Skipping guild for this tick, snapshot build failed"
                    );
                }
            }
        }

        let elapsed = start.elapsed();
        BROADCAST_ROUND_DURATION.observe(elapsed.as_secs_f64());

        tracing::debug!(
            delivered = delivered,
            failed = failed,
            elapsed_ms = elapsed.as_millis() as u64,
            "Broadcast round completed"
        );

        if elapsed > Duration::from_secs(self.config.broadcast_interval) / 2 {
            tracing::warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                interval_secs = self.config.broadcast_interval,
                "Broadcast round took more than 50% of the interval"
            );
        }
    }
}
