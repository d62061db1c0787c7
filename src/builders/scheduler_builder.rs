//! Build an [`AdmissionScheduler`] from configuration and adapters.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::core::audit::{EventBus, EventSink};
use crate::core::scheduler::{AdmissionScheduler, ClusterRuntime};
use crate::core::store::JobStore;
use crate::core::substrate::{CapacityFeed, Substrate};
use crate::core::SchedulerError;
use crate::infra::{InMemoryJobStore, InMemoryPendingQueue, StaticCapacityFeed};
use crate::util::serde::ClusterId;

/// Assembles a scheduler. Each configured cluster needs a substrate; the store
/// and capacity feed default to their in-memory versions.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    store: Option<Arc<dyn JobStore>>,
    feed: Option<Arc<dyn CapacityFeed>>,
    substrates: HashMap<ClusterId, Arc<dyn Substrate>>,
    sinks: Vec<Box<dyn EventSink>>,
}

impl SchedulerBuilder {
    /// Start from a configuration.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            store: None,
            feed: None,
            substrates: HashMap::new(),
            sinks: Vec::new(),
        }
    }

    /// Use a specific job store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a specific capacity feed.
    #[must_use]
    pub fn with_capacity_feed(mut self, feed: Arc<dyn CapacityFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Attach the substrate of one cluster.
    #[must_use]
    pub fn with_substrate(mut self, cluster: impl Into<ClusterId>, substrate: Arc<dyn Substrate>) -> Self {
        self.substrates.insert(cluster.into(), substrate);
        self
    }

    /// Register an extra status-event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Validate the configuration and build the scheduler.
    pub fn build(mut self) -> Result<AdmissionScheduler, SchedulerError> {
        self.config
            .validate()
            .map_err(|e| SchedulerError::Config(format!("config invalid: {e}")))?;

        let mut clusters = BTreeMap::new();
        for cluster in &self.config.clusters {
            let substrate = self.substrates.remove(&cluster.id).ok_or_else(|| {
                SchedulerError::Config(format!("no substrate attached for cluster `{}`", cluster.id))
            })?;
            let runtime = ClusterRuntime::new(cluster.clone(), substrate, Box::new(InMemoryPendingQueue::new()))?;
            clusters.insert(cluster.id.clone(), runtime);
        }
        if let Some(extra) = self.substrates.keys().next() {
            return Err(SchedulerError::UnknownCluster(extra.clone()));
        }

        let events = Arc::new(EventBus::new(self.config.event_history));
        for sink in self.sinks {
            events.add_sink(sink);
        }
        let store = self.store.unwrap_or_else(|| Arc::new(InMemoryJobStore::new()));
        let feed = self.feed.unwrap_or_else(|| Arc::new(StaticCapacityFeed::new()));
        tracing::info!(clusters = clusters.len(), "admission scheduler built");
        Ok(AdmissionScheduler::new(self.config, store, events, feed, clusters))
    }
}
