//! In-memory aggregator backend.
//!
//! Serves empty-but-valid snapshots when no database is configured, and
//! doubles as a programmable test backend: tests can pin the snapshot that
//! every call returns and read back how many calls were made.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use crate::snapshot::StatsSnapshot;

use super::{AggregatorError, StatsAggregator};

pub struct MemoryStatsAggregator {
    fixed: Option<StatsSnapshot>,
    calls: AtomicU64,
}

impl MemoryStatsAggregator {
    pub fn new() -> Self {
        Self {
            fixed: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Pin the snapshot returned by every call.
    pub fn with_snapshot(snapshot: StatsSnapshot) -> Self {
        Self {
            fixed: Some(snapshot),
            calls: AtomicU64::new(0),
        }
    }

    /// Number of `get_snapshot` calls made so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Default for MemoryStatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatsAggregator for MemoryStatsAggregator {
    async fn get_snapshot(&self, _guild_id: u64) -> Result<StatsSnapshot, AggregatorError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .fixed
            .clone()
            .unwrap_or_else(|| StatsSnapshot::empty(Utc::now())))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_returns_empty_but_valid_snapshot() {
        let aggregator = MemoryStatsAggregator::new();
        let snapshot = aggregator.get_snapshot(42).await.unwrap();

        assert!(snapshot.active_items.is_empty());
        assert_eq!(aggregator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_pinned_snapshot_is_returned_verbatim() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let pinned = StatsSnapshot::empty(at);
        let aggregator = MemoryStatsAggregator::with_snapshot(pinned.clone());

        assert_eq!(aggregator.get_snapshot(42).await.unwrap(), pinned);
        assert_eq!(aggregator.get_snapshot(7).await.unwrap(), pinned);
        assert_eq!(aggregator.call_count(), 2);
    }
}
