//! Snapshot freshness tracking.
//!
//! Arrival order is not authoritative: an `auto_update` and a self-triggered
//! `data_update` may be in flight simultaneously. `generated_at` decides
//! whether a snapshot is newer than the one already rendered.

use chrono::{DateTime, Utc};

#[derive(Debug, Default)]
pub struct SnapshotCursor {
    latest: Option<DateTime<Utc>>,
}

impl SnapshotCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the snapshot is newer than anything seen so far and
    /// advances the cursor; false means the caller should discard it.
    /// A timestamp equal to the current one is a duplicate and is discarded.
    pub fn observe(&mut self, generated_at: DateTime<Utc>) -> bool {
        match self.latest {
            Some(latest) if generated_at <= latest => false,
            _ => {
                self.latest = Some(generated_at);
                true
            }
        }
    }

    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.latest
    }
}
