//! Converges one derived object towards its source.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use polsync_core::{Error, ObjectKey, Result, ResultExt};
use polsync_events::{DerivedClient, DerivedLister, Resource, SourceLister};
use tracing::{debug, info, warn};

use crate::convert::Projection;

/// What a successful sync did to the derived store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing to write.
    Unchanged,
    Created,
    Updated,
    /// The derived object was orphaned and removed.
    Deleted,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unchanged => "unchanged",
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Handles one key popped from a work queue.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// Name used for the controller and its queue.
    fn name(&self) -> &str;

    /// Bring the derived object for `key` in line with its source.
    async fn sync(&self, key: &str) -> Result<SyncOutcome>;
}

/// Level-triggered reconciler for one projection.
pub struct Reconciler<P: Projection> {
    source: Arc<dyn SourceLister<P::Source>>,
    derived: Arc<dyn DerivedLister<P::Derived>>,
    client: Arc<dyn DerivedClient<P::Derived>>,
    _projection: PhantomData<fn() -> P>,
}

impl<P: Projection> Reconciler<P> {
    /// Create a reconciler over the given stores.
    pub fn new(
        source: Arc<dyn SourceLister<P::Source>>,
        derived: Arc<dyn DerivedLister<P::Derived>>,
        client: Arc<dyn DerivedClient<P::Derived>>,
    ) -> Self {
        Self {
            source,
            derived,
            client,
            _projection: PhantomData,
        }
    }

    /// Reconcile the object for `key`.
    ///
    /// Only [`Error::NotFound`] from lookups and from the orphan delete is
    /// absorbed; every other error is returned for the caller to retry.
    pub async fn reconcile(&self, key: &str) -> Result<SyncOutcome> {
        let key = ObjectKey::parse(key)?;

        let existing = match self.derived.get(&key).await {
            Ok(obj) => Some(obj),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        let source = self.source.get(&key).await?;

        match (source, existing) {
            (None, None) => Ok(SyncOutcome::Unchanged),
            (None, Some(_)) => self.delete_orphan(&key).await,
            (Some(source), None) => self.create(&key, &source).await,
            (Some(source), Some(existing)) => self.update(&key, &source, &existing).await,
        }
    }

    async fn delete_orphan(&self, key: &ObjectKey) -> Result<SyncOutcome> {
        match self.client.delete(key).await {
            Ok(()) => {
                info!(controller = P::NAME, key = %key, "Deleted orphaned object");
                Ok(SyncOutcome::Deleted)
            }
            Err(e) if e.is_not_found() => {
                debug!(controller = P::NAME, key = %key, "Orphan already gone");
                Ok(SyncOutcome::Deleted)
            }
            Err(e) => Err(e),
        }
    }

    async fn create(&self, key: &ObjectKey, source: &P::Source) -> Result<SyncOutcome> {
        let mut candidate = P::convert(source)?;
        candidate.meta_mut().resource_version.clear();

        self.client.create(candidate).await?;
        info!(controller = P::NAME, key = %key, "Created derived object");
        Ok(SyncOutcome::Created)
    }

    async fn update(
        &self,
        key: &ObjectKey,
        source: &P::Source,
        existing: &P::Derived,
    ) -> Result<SyncOutcome> {
        let mut candidate = P::convert(source)?;
        candidate.meta_mut().copy_identity_from(existing.meta());

        if candidate == *existing {
            debug!(controller = P::NAME, key = %key, "Already converged");
            return Ok(SyncOutcome::Unchanged);
        }

        match self.client.update(candidate).await {
            Ok(_) => {
                info!(controller = P::NAME, key = %key, "Updated derived object");
                Ok(SyncOutcome::Updated)
            }
            Err(e) if e.is_invalid() => {
                warn!(
                    controller = P::NAME,
                    key = %key,
                    error = %e,
                    "Update rejected, deleting so the next sync recreates it"
                );
                // The original error still decides the requeue.
                let _ = self.client.delete(key).await.inspect_error(|delete_err| {
                    warn!(
                        controller = P::NAME,
                        key = %key,
                        error = %delete_err,
                        "Delete after rejected update failed"
                    );
                });
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<P: Projection> SyncHandler for Reconciler<P> {
    fn name(&self) -> &str {
        P::NAME
    }

    async fn sync(&self, key: &str) -> Result<SyncOutcome> {
        self.reconcile(key).await
    }
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder<P: Projection> {
    source: Option<Arc<dyn SourceLister<P::Source>>>,
    derived: Option<Arc<dyn DerivedLister<P::Derived>>>,
    client: Option<Arc<dyn DerivedClient<P::Derived>>>,
}

impl<P: Projection> ReconcilerBuilder<P> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            source: None,
            derived: None,
            client: None,
        }
    }

    /// Set the source lister.
    pub fn with_source(mut self, source: Arc<dyn SourceLister<P::Source>>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the derived lister.
    pub fn with_derived(mut self, derived: Arc<dyn DerivedLister<P::Derived>>) -> Self {
        self.derived = Some(derived);
        self
    }

    /// Set the derived client.
    pub fn with_client(mut self, client: Arc<dyn DerivedClient<P::Derived>>) -> Self {
        self.client = Some(client);
        self
    }

    /// Use one store as both derived lister and client.
    pub fn with_derived_store<S>(self, store: Arc<S>) -> Self
    where
        S: DerivedLister<P::Derived> + DerivedClient<P::Derived> + 'static,
    {
        let derived: Arc<dyn DerivedLister<P::Derived>> = store.clone();
        let client: Arc<dyn DerivedClient<P::Derived>> = store;
        self.with_derived(derived).with_client(client)
    }

    /// Build the reconciler.
    pub fn build(self) -> Result<Reconciler<P>> {
        let source = self
            .source
            .ok_or_else(|| Error::invalid_config("source lister is required"))?;
        let derived = self
            .derived
            .ok_or_else(|| Error::invalid_config("derived lister is required"))?;
        let client = self
            .client
            .ok_or_else(|| Error::invalid_config("derived client is required"))?;

        Ok(Reconciler::new(source, derived, client))
    }
}

impl<P: Projection> Default for ReconcilerBuilder<P> {
    fn default() -> Self {
        Self::new()
    }
}
