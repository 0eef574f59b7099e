//! In-memory subscription registry.
//!
//! Maps guild id to the set of subscribed sessions, with a session table for
//! O(1) handle lookup. The registry owns no persisted state; it is rebuilt
//! from scratch on restart as clients reconnect and resubscribe.
//!
//! Mutations are serialized per shard by the underlying map;
//! [`SubscriptionRegistry::snapshot_subscribers`] hands out a point-in-time
//! copy so callers can push over the network without holding any lock.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::websocket::SessionHandle;

pub struct SubscriptionRegistry {
    /// connection_id -> SessionHandle
    sessions: DashMap<Uuid, Arc<SessionHandle>>,
    /// guild_id -> Set<connection_id>; entries exist only while non-empty
    guild_index: DashMap<u64, HashSet<Uuid>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            guild_index: DashMap::new(),
        }
    }

    /// Register a session as a subscriber of `guild_id`. Idempotent; creates
    /// the guild entry if absent.
    pub fn add(&self, guild_id: u64, handle: Arc<SessionHandle>) {
        let connection_id = handle.id;
        self.sessions.insert(connection_id, handle);
        self.guild_index
            .entry(guild_id)
            .or_default()
            .insert(connection_id);

        tracing::debug!(
            connection_id = %connection_id,
            guild_id = guild_id,
            "Subscriber registered"
        );
    }

    /// Remove a subscriber and reap the guild entry if it becomes empty.
    ///
    /// Safe to call for ids that were never added or were already removed;
    /// the transport-error and heartbeat-timeout paths may both get here.
    pub fn remove(&self, guild_id: u64, connection_id: Uuid) {
        if self.sessions.remove(&connection_id).is_some() {
            tracing::debug!(
                connection_id = %connection_id,
                guild_id = guild_id,
                "Subscriber removed"
            );
        }

        if let Some(mut subscribers) = self.guild_index.get_mut(&guild_id) {
            subscribers.remove(&connection_id);
            if subscribers.is_empty() {
                drop(subscribers);
                self.guild_index
                    .remove_if(&guild_id, |_, subscribers| subscribers.is_empty());
            }
        }
    }

    /// Point-in-time copy of a guild's subscribers, so fan-out can iterate
    /// and push without holding a lock across I/O.
    pub fn snapshot_subscribers(&self, guild_id: u64) -> Vec<Arc<SessionHandle>> {
        self.guild_index
            .get(&guild_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.sessions.get(id).map(|h| h.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Guilds that currently have at least one subscriber.
    pub fn active_guilds(&self) -> Vec<u64> {
        self.guild_index.iter().map(|entry| *entry.key()).collect()
    }

    pub fn subscriber_count(&self, guild_id: u64) -> usize {
        self.guild_index
            .get(&guild_id)
            .map(|ids| ids.len())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> RegistryStats {
        let mut guilds = std::collections::HashMap::new();
        for entry in self.guild_index.iter() {
            guilds.insert(entry.key().to_string(), entry.value().len());
        }

        RegistryStats {
            total_sessions: self.sessions.len(),
            active_guilds: self.guild_index.len(),
            guilds,
        }
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStats {
    pub total_sessions: usize,
    pub active_guilds: usize,
    pub guilds: std::collections::HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn test_handle(client: &str) -> Arc<SessionHandle> {
        let (tx, _rx) = mpsc::channel(1);
        Arc::new(SessionHandle::new(client.to_string(), tx))
    }

    #[test]
    fn test_add_and_snapshot() {
        let registry = SubscriptionRegistry::new();
        let a = test_handle("a");
        let b = test_handle("b");

        registry.add(42, a.clone());
        registry.add(42, b.clone());
        registry.add(7, test_handle("c"));

        let subscribers = registry.snapshot_subscribers(42);
        assert_eq!(subscribers.len(), 2);
        let mut guilds = registry.active_guilds();
        guilds.sort_unstable();
        assert_eq!(guilds, vec![7, 42]);
    }

    #[test]
    fn test_add_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let handle = test_handle("a");

        registry.add(42, handle.clone());
        registry.add(42, handle.clone());

        assert_eq!(registry.subscriber_count(42), 1);
        assert_eq!(registry.stats().total_sessions, 1);
    }

    #[test]
    fn test_empty_guild_entries_are_reaped() {
        let registry = SubscriptionRegistry::new();
        let handle = test_handle("a");

        registry.add(42, handle.clone());
        registry.remove(42, handle.id);

        assert!(registry.active_guilds().is_empty());
        assert!(registry.snapshot_subscribers(42).is_empty());
        assert_eq!(registry.stats().total_sessions, 0);
    }

    #[test]
    fn test_double_remove_is_a_noop() {
        let registry = SubscriptionRegistry::new();
        let a = test_handle("a");
        let b = test_handle("b");
        registry.add(42, a.clone());
        registry.add(42, b.clone());

        // Simulates the write-failure and heartbeat-timeout paths racing.
        registry.remove(42, a.id);
        registry.remove(42, a.id);

        assert_eq!(registry.subscriber_count(42), 1);
        assert_eq!(registry.snapshot_subscribers(42)[0].id, b.id);
    }

    #[test]
    fn test_remove_unknown_id_is_a_noop() {
        let registry = SubscriptionRegistry::new();
        registry.remove(42, Uuid::new_v4());
        assert!(registry.active_guilds().is_empty());
    }

    #[test]
    fn test_snapshot_is_a_copy_not_a_live_view() {
        let registry = SubscriptionRegistry::new();
        let a = test_handle("a");
        registry.add(42, a.clone());

        let snapshot = registry.snapshot_subscribers(42);
        registry.remove(42, a.id);

        // The copy taken before removal is unaffected.
        assert_eq!(snapshot.len(), 1);
        assert!(registry.snapshot_subscribers(42).is_empty());
    }
}
