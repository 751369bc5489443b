//! In-process wiring of one projection: cache, ingester, queue, derived
//! store, reconciler and controller.

use std::sync::Arc;
use std::time::Duration;

use polsync_core::Result;
use polsync_events::{
    Container, EventIngester, InMemoryDerivedStore, IndexedCache, Resource, TracingDerivedClient,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::ControllerConfig;
use crate::controller::{Controller, forward_derived_changes};
use crate::convert::Projection;
use crate::queue::WorkQueue;
use crate::reconciler::{Reconciler, ReconcilerBuilder};

/// Consecutive idle polls required before [`Pipeline::settle`] returns.
const SETTLE_POLLS: u32 = 3;

/// Everything one projection needs, backed by an in-memory derived store.
pub struct Pipeline<C, P>
where
    C: Container,
    P: Projection<Source = C::Item>,
{
    queue: Arc<WorkQueue>,
    ingester: EventIngester<C>,
    store: Arc<InMemoryDerivedStore<P::Derived>>,
    controller: Arc<Controller<Reconciler<P>>>,
}

impl<C, P> Pipeline<C, P>
where
    C: Container,
    P: Projection<Source = C::Item>,
{
    /// Wire a pipeline with an empty cache and store.
    pub fn new(config: ControllerConfig) -> Result<Self> {
        config.validate()?;

        let cache: Arc<IndexedCache<C::Item>> = Arc::new(IndexedCache::new());
        let queue = Arc::new(WorkQueue::new(P::NAME, config.backoff()));
        let ingester = EventIngester::new(Arc::clone(&cache), queue.clone());
        let store: Arc<InMemoryDerivedStore<P::Derived>> =
            Arc::new(InMemoryDerivedStore::new(P::RESOURCE));

        let reconciler = ReconcilerBuilder::<P>::new()
            .with_source(cache.clone())
            .with_derived(store.clone())
            .with_client(Arc::new(TracingDerivedClient::new(Arc::clone(&store))))
            .build()?;

        let synced = Arc::clone(&cache);
        let controller = Arc::new(Controller::new(
            Arc::new(reconciler),
            Arc::clone(&queue),
            Arc::new(move || synced.has_synced()),
            config,
        ));

        Ok(Self {
            queue,
            ingester,
            store,
            controller,
        })
    }

    /// Work queue.
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Ingester feeding the cache and queue.
    pub fn ingester(&self) -> &EventIngester<C> {
        &self.ingester
    }

    /// Derived store.
    pub fn store(&self) -> &Arc<InMemoryDerivedStore<P::Derived>> {
        &self.store
    }

    /// Start the controller and the derived change forwarder.
    ///
    /// Both stop when `shutdown` turns true. The returned handle resolves
    /// with the controller's result.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<Result<()>> {
        let forwarder = forward_derived_changes(
            self.store.subscribe(),
            Arc::clone(&self.queue),
            shutdown.clone(),
        );
        let controller = Arc::clone(&self.controller);
        let store = Arc::clone(&self.store);

        tokio::spawn(async move {
            // Initial listing of the derived side, so orphans present before
            // startup get collected.
            for obj in store.list().await {
                if let Ok(key) = obj.key() {
                    controller.queue().add(&key.to_string());
                }
            }

            let result = controller.run(shutdown).await;
            if result.is_err() {
                forwarder.abort();
            }
            result
        })
    }

    /// Wait until the queue stays idle for a few consecutive polls.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn settle(&self, timeout: Duration) -> bool {
        let poll = Duration::from_millis(10);
        let idle = tokio::time::timeout(timeout, async {
            let mut idle_polls: u32 = 0;
            while idle_polls < SETTLE_POLLS {
                tokio::time::sleep(poll).await;
                idle_polls = if self.queue.is_idle() {
                    idle_polls.saturating_add(1)
                } else {
                    0
                };
            }
        })
        .await;

        if idle.is_err() {
            debug!(controller = P::NAME, queued = self.queue.len(), "Did not settle");
            return false;
        }
        true
    }
}
