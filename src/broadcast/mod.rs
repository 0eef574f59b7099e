//! Snapshot fan-out.
//!
//! One aggregator call per guild per round, regardless of subscriber count.
//! The envelope is serialized once and the shared text is queued to every
//! subscriber without waiting; a failed push tears down only that session
//! and a slow subscriber never stalls the round.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::aggregator::{AggregatorError, StatsAggregator};
use crate::metrics::{PUSH_FAILURES_TOTAL, SNAPSHOTS_PUSHED_TOTAL};
use crate::registry::SubscriptionRegistry;
use crate::snapshot::StatsSnapshot;
use crate::websocket::{OutboundFrame, ServerMessage, SessionHandle, SessionState};

/// Which envelope a snapshot push is wrapped in. All three carry the same
/// payload shape and differ only in their tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Sent exactly once per session right after subscribe.
    Initial,
    /// Answers a client's `request_update`.
    Requested,
    /// The scheduler's periodic push.
    Scheduled,
}

impl UpdateKind {
    fn envelope(self, data: StatsSnapshot) -> ServerMessage {
        match self {
            Self::Initial => ServerMessage::InitialData { data },
            Self::Requested => ServerMessage::DataUpdate { data },
            Self::Scheduled => ServerMessage::AutoUpdate { data },
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Initial => "initial_data",
            Self::Requested => "data_update",
            Self::Scheduled => "auto_update",
        }
    }
}

/// Outcome of one guild fan-out.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct BroadcasterStats {
    pub rounds: AtomicU64,
    pub snapshots_pushed: AtomicU64,
    pub push_failures: AtomicU64,
    pub aggregator_errors: AtomicU64,
}

impl BroadcasterStats {
    pub fn snapshot(&self) -> BroadcasterStatsSnapshot {
        BroadcasterStatsSnapshot {
            rounds: self.rounds.load(Ordering::Relaxed),
            snapshots_pushed: self.snapshots_pushed.load(Ordering::Relaxed),
            push_failures: self.push_failures.load(Ordering::Relaxed),
            aggregator_errors: self.aggregator_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BroadcasterStatsSnapshot {
    pub rounds: u64,
    pub snapshots_pushed: u64,
    pub push_failures: u64,
    pub aggregator_errors: u64,
}

/// Pushes snapshots to subscribed sessions.
pub struct SnapshotBroadcaster {
    registry: Arc<SubscriptionRegistry>,
    aggregator: Arc<dyn StatsAggregator>,
    stats: BroadcasterStats,
}

impl SnapshotBroadcaster {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        aggregator: Arc<dyn StatsAggregator>,
    ) -> Self {
        Self {
            registry,
            aggregator,
            stats: BroadcasterStats::default(),
        }
    }

    pub fn stats(&self) -> BroadcasterStatsSnapshot {
        self.stats.snapshot()
    }

    /// One aggregator call, then fan the same snapshot out to every session
    /// currently subscribed to `guild_id`.
    #[tracing::instrument(name = "broadcast.guild", skip(self), fields(guild_id = guild_id))]
    pub async fn broadcast_guild(
        &self,
        guild_id: u64,
        kind: UpdateKind,
    ) -> Result<DeliveryReport, AggregatorError> {
        self.stats.rounds.fetch_add(1, Ordering::Relaxed);

        let subscribers = self.registry.snapshot_subscribers(guild_id);
        if subscribers.is_empty() {
            return Ok(DeliveryReport::default());
        }

        let snapshot = match self.aggregator.get_snapshot(guild_id).await {
            Ok(s) => s,
            Err(e) => {
                self.stats.aggregator_errors.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let message = kind.envelope(snapshot);
        // Serialize once; every subscriber gets the same wire text.
        let frame = match OutboundFrame::preserialized(&message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize snapshot envelope");
                OutboundFrame::Raw(message)
            }
        };

        let mut delivered = 0;
        let mut failed = 0;

        // try_send keeps the round independent of every subscriber's read
        // pace: a full outbound buffer fails the push instead of waiting for
        // the client to drain it.
        for session in subscribers {
            if session.try_send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                failed += 1;
                self.fail_session(guild_id, &session).await;
            }
        }

        self.stats
            .snapshots_pushed
            .fetch_add(delivered as u64, Ordering::Relaxed);
        SNAPSHOTS_PUSHED_TOTAL
            .with_label_values(&[kind.label()])
            .inc_by(delivered as u64);

        tracing::debug!(
            guild_id = guild_id,
            kind = kind.label(),
            delivered = delivered,
            failed = failed,
            "Guild fan-out completed"
        );

        Ok(DeliveryReport { delivered, failed })
    }

    /// One aggregator call, one recipient. Used for `initial_data` after
    /// subscribe and for `data_update` answering `request_update`.
    pub async fn push_to_session(
        &self,
        session: &Arc<SessionHandle>,
        guild_id: u64,
        kind: UpdateKind,
    ) -> Result<(), AggregatorError> {
        let snapshot = match self.aggregator.get_snapshot(guild_id).await {
            Ok(s) => s,
            Err(e) => {
                self.stats.aggregator_errors.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let frame = OutboundFrame::Raw(kind.envelope(snapshot));
        if session.send(frame).await.is_err() {
            self.fail_session(guild_id, session).await;
        } else {
            self.stats.snapshots_pushed.fetch_add(1, Ordering::Relaxed);
            SNAPSHOTS_PUSHED_TOTAL.with_label_values(&[kind.label()]).inc();
        }

        Ok(())
    }

    /// A push never retries: a failed send means the client is gone or not
    /// draining its buffer, so the session is moved to `Closing` and
    /// deregistered immediately.
    async fn fail_session(&self, guild_id: u64, session: &Arc<SessionHandle>) {
        self.stats.push_failures.fetch_add(1, Ordering::Relaxed);
        PUSH_FAILURES_TOTAL.inc();

        session.set_state(SessionState::Closing).await;
        self.registry.remove(guild_id, session.id);

        tracing::info!(
            connection_id = %session.id,
            guild_id = guild_id,
            "Push failed, session deregistered"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::MemoryStatsAggregator;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use tokio::sync::mpsc;

    struct FailingAggregator;

    #[async_trait]
    impl StatsAggregator for FailingAggregator {
        async fn get_snapshot(&self, _guild_id: u64) -> Result<StatsSnapshot, AggregatorError> {
            Err(AggregatorError::Database(sqlx::Error::PoolClosed))
        }

        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    fn subscribed_session(
        registry: &SubscriptionRegistry,
        guild_id: u64,
        client: &str,
    ) -> (Arc<SessionHandle>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(8);
        let handle = Arc::new(SessionHandle::new(client.to_string(), tx));
        registry.add(guild_id, handle.clone());
        (handle, rx)
    }

    #[tokio::test]
    async fn test_one_aggregator_call_per_fanout() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let aggregator = Arc::new(MemoryStatsAggregator::new());
        let broadcaster = SnapshotBroadcaster::new(registry.clone(), aggregator.clone());

        let (_a, mut rx_a) = subscribed_session(&registry, 42, "a");
        let (_b, mut rx_b) = subscribed_session(&registry, 42, "b");
        let (_c, mut rx_c) = subscribed_session(&registry, 42, "c");

        let report = broadcaster
            .broadcast_guild(42, UpdateKind::Scheduled)
            .await
            .unwrap();

        assert_eq!(report.delivered, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(aggregator.call_count(), 1);

        // All three received byte-identical auto_update frames.
        let texts: Vec<String> = [
            rx_a.recv().await.unwrap(),
            rx_b.recv().await.unwrap(),
            rx_c.recv().await.unwrap(),
        ]
        .iter()
        .map(|f| f.to_text().unwrap())
        .collect();
        assert!(texts[0].contains(r#""type":"auto_update""#));
        assert_eq!(texts[0], texts[1]);
        assert_eq!(texts[1], texts[2]);
    }

    #[tokio::test]
    async fn test_no_subscribers_means_no_aggregator_call() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let aggregator = Arc::new(MemoryStatsAggregator::new());
        let broadcaster = SnapshotBroadcaster::new(registry, aggregator.clone());

        let report = broadcaster
            .broadcast_guild(42, UpdateKind::Scheduled)
            .await
            .unwrap();

        assert_eq!(report.delivered, 0);
        assert_eq!(aggregator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_push_deregisters_only_that_session() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let aggregator = Arc::new(MemoryStatsAggregator::new());
        let broadcaster = SnapshotBroadcaster::new(registry.clone(), aggregator);

        let (dead, dead_rx) = subscribed_session(&registry, 42, "dead");
        let (_alive, mut alive_rx) = subscribed_session(&registry, 42, "alive");
        drop(dead_rx);

        let report = broadcaster
            .broadcast_guild(42, UpdateKind::Scheduled)
            .await
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(dead.state().await, SessionState::Closing);
        assert_eq!(registry.subscriber_count(42), 1);
        assert!(alive_rx.recv().await.is_some());

        // The next fan-out goes only to the surviving session.
        let report = broadcaster
            .broadcast_guild(42, UpdateKind::Scheduled)
            .await
            .unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_stall_the_round() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let aggregator = Arc::new(MemoryStatsAggregator::new());
        let broadcaster = SnapshotBroadcaster::new(registry.clone(), aggregator);

        // A subscriber with a full outbound buffer: the receiver stays alive
        // but never drains, as a client that pings but stops reading would.
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let slow = Arc::new(SessionHandle::new("stalled".to_string(), slow_tx));
        slow.send(ServerMessage::Pong.into()).await.unwrap();
        registry.add(42, slow.clone());

        let (_alive, mut alive_rx) = subscribed_session(&registry, 42, "alive");

        let report = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            broadcaster.broadcast_guild(42, UpdateKind::Scheduled),
        )
        .await
        .expect("round must complete without waiting on the stalled session")
        .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(slow.state().await, SessionState::Closing);
        assert_eq!(registry.subscriber_count(42), 1);
        assert!(alive_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_aggregator_error_pushes_nothing() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let broadcaster = SnapshotBroadcaster::new(registry.clone(), Arc::new(FailingAggregator));

        let (_s, mut rx) = subscribed_session(&registry, 42, "a");

        let result = broadcaster.broadcast_guild(42, UpdateKind::Scheduled).await;
        assert!(result.is_err());
        assert!(rx.try_recv().is_err());
        // The subscriber stays registered for the next tick.
        assert_eq!(registry.subscriber_count(42), 1);
    }

    #[tokio::test]
    async fn test_single_recipient_push_carries_requested_tag() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let aggregator = Arc::new(MemoryStatsAggregator::with_snapshot(StatsSnapshot::empty(at)));
        let broadcaster = SnapshotBroadcaster::new(registry.clone(), aggregator);

        let (session, mut rx) = subscribed_session(&registry, 42, "a");
        broadcaster
            .push_to_session(&session, 42, UpdateKind::Requested)
            .await
            .unwrap();

        let text = rx.recv().await.unwrap().to_text().unwrap();
        assert!(text.contains(r#""type":"data_update""#));
        assert!(text.contains("2025-01-01T00:00:00Z"));
    }
}
