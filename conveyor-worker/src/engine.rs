//! Worker pool lifecycle.

use std::sync::Arc;

use conveyor_broker::Broker;
use conveyor_registry::{EventSink, Registry, TracingEventSink};
use conveyor_results::ResultStore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::WorkerConfig;
use crate::slot::Slot;

/// A pool of worker slots bound to one broker and one result store.
pub struct WorkerEngine {
    config: WorkerConfig,
    broker: Arc<dyn Broker>,
    results: Arc<dyn ResultStore>,
    registry: Registry,
    sink: Arc<dyn EventSink>,
}

impl WorkerEngine {
    pub fn new(
        config: WorkerConfig,
        broker: Arc<dyn Broker>,
        results: Arc<dyn ResultStore>,
        registry: Registry,
    ) -> Self {
        Self {
            config,
            broker,
            results,
            registry,
            sink: Arc::new(TracingEventSink),
        }
    }

    /// Replace the handler event sink (tests capture events this way).
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Run the pool until `shutdown` is cancelled and every slot has
    /// settled its in-flight work per the configured shutdown policy.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            concurrency = self.config.concurrency,
            tasks = self.registry.len(),
            "worker engine starting"
        );

        let mut slots = JoinSet::new();
        for id in 0..self.config.concurrency.max(1) {
            let slot = Slot {
                id,
                config: self.config.clone(),
                broker: self.broker.clone(),
                results: self.results.clone(),
                registry: self.registry.clone(),
                sink: self.sink.clone(),
            };
            let shutdown = shutdown.clone();
            slots.spawn(async move { slot.run(shutdown).await });
        }

        while slots.join_next().await.is_some() {}
        info!("worker engine stopped");
    }
}
