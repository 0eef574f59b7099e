//! Immutable statistics snapshots.
//!
//! A [`StatsSnapshot`] is built once by the aggregator and never mutated
//! afterwards; broadcasts share it across subscribers without copying. All
//! timestamps are UTC and serialize as ISO-8601 strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time summary of vote/ticket state for one guild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub active_items: Vec<Item>,
    pub recent_completed: Vec<Item>,
    pub today_counters: TodayCounters,
    pub summary: SummaryTotals,
    pub generated_at: DateTime<Utc>,
}

impl StatsSnapshot {
    /// An empty-but-valid snapshot for guilds with no data.
    pub fn empty(generated_at: DateTime<Utc>) -> Self {
        Self {
            active_items: Vec::new(),
            recent_completed: Vec::new(),
            today_counters: TodayCounters::default(),
            summary: SummaryTotals::default(),
            generated_at,
        }
    }
}

/// Projection of a single vote or ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub title: String,
    pub window: ItemWindow,
    pub flags: ItemFlags,
    pub participant_count: u64,
    pub options: Vec<ItemOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFlags {
    pub multi_select: bool,
    pub anonymous: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOption {
    pub option_id: i64,
    pub label: String,
    pub vote_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodayCounters {
    pub created: u64,
    pub completed: u64,
    pub total_participants: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryTotals {
    pub active_count: u64,
    pub total_active_participants: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_empty_snapshot_is_valid() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let snapshot = StatsSnapshot::empty(at);

        assert!(snapshot.active_items.is_empty());
        assert_eq!(snapshot.summary.active_count, 0);
        assert_eq!(snapshot.generated_at, at);
    }

    #[test]
    fn test_snapshot_serializes_iso8601_utc() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let json = serde_json::to_value(StatsSnapshot::empty(at)).unwrap();

        assert_eq!(json["generated_at"], "2025-01-01T00:00:00Z");
        assert_eq!(json["today_counters"]["created"], 0);
        assert_eq!(json["summary"]["total_active_participants"], 0);
    }

    #[test]
    fn test_item_wire_shape() {
        let at = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let item = Item {
            id: 7,
            title: "Weekly event poll".to_string(),
            window: ItemWindow {
                start: at,
                end: at + chrono::Duration::hours(48),
            },
            flags: ItemFlags {
                multi_select: true,
                anonymous: false,
            },
            participant_count: 12,
            options: vec![ItemOption {
                option_id: 1,
                label: "Saturday".to_string(),
                vote_count: 8,
            }],
        };

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["flags"]["multi_select"], true);
        assert_eq!(json["options"][0]["vote_count"], 8);
        assert_eq!(json["window"]["start"], "2025-03-10T12:00:00Z");
    }
}
