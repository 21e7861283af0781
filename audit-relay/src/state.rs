//! Application state shared by the HTTP handlers

use std::sync::Arc;

use crate::{
    config::Config,
    intake::Intake,
    persister::PipelineStats,
    queue::DeliveryQueue,
    store::EventStore,
};

/// Long-lived handles, constructed once at startup and injected into the router
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    intake: Intake,
    queue: Arc<dyn DeliveryQueue>,
    store: Arc<dyn EventStore>,
    stats: Arc<PipelineStats>,
}

impl AppState {
    /// Create state over an already connected queue and store
    ///
    /// `stats` should be the persister's counters so the stats endpoint
    /// reports what the consumer loop is doing.
    pub fn new(
        config: Config,
        queue: Arc<dyn DeliveryQueue>,
        store: Arc<dyn EventStore>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            intake: Intake::new(queue.clone()),
            queue,
            store,
            stats,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn intake(&self) -> &Intake {
        &self.intake
    }

    pub fn queue(&self) -> &Arc<dyn DeliveryQueue> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }
}
