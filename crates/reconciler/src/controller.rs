//! Generic worker loop driving a [`SyncHandler`] from a [`WorkQueue`].

use std::sync::Arc;

use polsync_core::{Error, Result};
use polsync_events::DerivedChange;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::queue::WorkQueue;
use crate::reconciler::{SyncHandler, SyncOutcome};

/// Predicate reporting whether every source cache finished its initial
/// listing.
pub type CachesSynced = Arc<dyn Fn() -> bool + Send + Sync>;

/// Runs a sync handler over the keys of one queue.
pub struct Controller<H: SyncHandler> {
    handler: Arc<H>,
    queue: Arc<WorkQueue>,
    caches_synced: CachesSynced,
    config: ControllerConfig,
}

impl<H: SyncHandler + 'static> Controller<H> {
    /// Create a controller.
    pub fn new(
        handler: Arc<H>,
        queue: Arc<WorkQueue>,
        caches_synced: CachesSynced,
        config: ControllerConfig,
    ) -> Self {
        Self {
            handler,
            queue,
            caches_synced,
            config,
        }
    }

    /// Controller name, taken from its handler.
    pub fn name(&self) -> &str {
        self.handler.name()
    }

    /// The queue this controller drains.
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Wait until the caches report synced or the configured timeout passes.
    pub async fn wait_for_cache_sync(&self) -> Result<()> {
        let poll = self.config.cache_sync_poll();
        let synced = tokio::time::timeout(self.config.cache_sync_timeout(), async {
            while !(self.caches_synced)() {
                tokio::time::sleep(poll).await;
            }
        })
        .await;
        if synced.is_err() {
            return Err(Error::cache_sync_timeout(
                self.name(),
                self.config.cache_sync_timeout_ms,
            ));
        }
        debug!(controller = %self.name(), "Caches synced");
        Ok(())
    }

    /// Take one key from the queue and sync it. Returns `false` once the
    /// queue is shut down.
    pub async fn process_next_work_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let result = self.handler.sync(&key).await;
        self.handle_result(&key, result);
        self.queue.done(&key);
        true
    }

    fn handle_result(&self, key: &str, result: Result<SyncOutcome>) {
        match result {
            Ok(outcome) => {
                debug!(controller = %self.name(), key, %outcome, "Synced");
                self.queue.forget(key);
            }
            Err(e) if !e.is_retryable() => {
                error!(controller = %self.name(), key, error = %e, "Dropping key");
                self.queue.forget(key);
            }
            Err(e) => {
                warn!(
                    controller = %self.name(),
                    key,
                    error = %e,
                    requeues = self.queue.num_requeues(key),
                    "Sync failed, requeueing"
                );
                self.queue.add_rate_limited(key);
            }
        }
    }

    /// Wait for the caches, run the workers until `shutdown` turns true (or
    /// its sender is dropped), then shut the queue down and join the workers.
    ///
    /// Reconciliations in flight at shutdown run to completion.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(controller = %self.name(), workers = self.config.workers, "Starting controller");

        if let Err(e) = self.wait_for_cache_sync().await {
            error!(controller = %self.name(), error = %e, "Unable to sync caches");
            self.queue.shut_down();
            return Err(e);
        }

        let workers: Vec<JoinHandle<()>> = (0..self.config.workers)
            .map(|_| {
                let controller = Arc::clone(&self);
                tokio::spawn(async move { while controller.process_next_work_item().await {} })
            })
            .collect();

        // A dropped sender counts as a shutdown request.
        let _ = shutdown.wait_for(|stop| *stop).await;

        info!(controller = %self.name(), "Shutting down controller");
        self.queue.shut_down();
        for worker in workers {
            if let Err(e) = worker.await {
                error!(controller = %self.name(), error = %e, "Worker task failed");
            }
        }
        Ok(())
    }
}

/// Enqueue the key of every derived change so out-of-band edits get
/// reverted. Stops when the store is dropped or `shutdown` turns true.
pub fn forward_derived_changes(
    mut changes: broadcast::Receiver<DerivedChange>,
    queue: Arc<WorkQueue>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                received = changes.recv() => match received {
                    Ok(change) => queue.add(&change.key.to_string()),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(queue = %queue.name(), missed, "Derived change notices dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!(queue = %queue.name(), "Derived change forwarding stopped");
    })
}
