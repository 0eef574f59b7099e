use std::sync::Arc;
use std::time::Instant;

use crate::aggregator::StatsAggregator;
use crate::broadcast::SnapshotBroadcaster;
use crate::config::Settings;
use crate::registry::SubscriptionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<SubscriptionRegistry>,
    pub aggregator: Arc<dyn StatsAggregator>,
    pub broadcaster: Arc<SnapshotBroadcaster>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings, aggregator: Arc<dyn StatsAggregator>) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let broadcaster = Arc::new(SnapshotBroadcaster::new(
            registry.clone(),
            aggregator.clone(),
        ));

        Self {
            settings: Arc::new(settings),
            registry,
            aggregator,
            broadcaster,
            start_time: Instant::now(),
        }
    }
}
