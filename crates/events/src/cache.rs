//! Indexed cache of source entities.
//!
//! Written from watch callbacks and read by reconciler workers. Entries are
//! keyed by [`ObjectKey`] with a secondary index by namespace. Writes are
//! last-write-wins. One cache is built per controller, never shared globally.
//!
//! Every entry remembers the container that last listed it. An entity can
//! move between containers, and the notifications for the two containers may
//! arrive in either order, so removal only succeeds for the current owner.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use polsync_core::{ObjectKey, Result};
use tracing::trace;

use crate::store::SourceLister;
use crate::types::Resource;

/// Namespace index entry for cluster-scoped objects.
const CLUSTER_SCOPE: &str = "";

struct Entry<T> {
    owner: ObjectKey,
    item: T,
}

struct Inner<T> {
    items: HashMap<ObjectKey, Entry<T>>,
    by_namespace: HashMap<String, BTreeSet<String>>,
}

impl<T> Default for Inner<T> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
            by_namespace: HashMap::new(),
        }
    }
}

/// Concurrent keyed store with a namespace index.
pub struct IndexedCache<T: Resource> {
    inner: RwLock<Inner<T>>,
    synced: AtomicBool,
}

impl<T: Resource> IndexedCache<T> {
    /// Create an empty, unsynced cache.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            synced: AtomicBool::new(false),
        }
    }

    /// Insert or replace an entity listed by the container `owner`,
    /// returning the entity's key. Ownership passes to `owner`.
    ///
    /// Fails without touching the cache when the entity's identity is
    /// malformed.
    pub fn upsert(&self, owner: &ObjectKey, item: T) -> Result<ObjectKey> {
        let key = item.key()?;
        let namespace = key.namespace().unwrap_or(CLUSTER_SCOPE).to_string();

        let mut inner = self.inner.write();
        inner
            .by_namespace
            .entry(namespace)
            .or_default()
            .insert(key.name().to_string());
        inner.items.insert(
            key.clone(),
            Entry {
                owner: owner.clone(),
                item,
            },
        );

        trace!(kind = T::KIND, key = %key, owner = %owner, "Cache upsert");
        Ok(key)
    }

    /// Remove an entity on behalf of the container `owner`, returning it.
    ///
    /// Leaves the entry alone and returns `None` when another container has
    /// listed the entity since.
    pub fn remove(&self, key: &ObjectKey, owner: &ObjectKey) -> Option<T> {
        let namespace = key.namespace().unwrap_or(CLUSTER_SCOPE);

        let mut inner = self.inner.write();
        match inner.items.get(key) {
            Some(entry) if entry.owner == *owner => {}
            Some(entry) => {
                trace!(
                    kind = T::KIND,
                    key = %key,
                    owner = %entry.owner,
                    departing = %owner,
                    "Cache remove skipped, entity moved"
                );
                return None;
            }
            None => {
                trace!(kind = T::KIND, key = %key, "Cache remove, not present");
                return None;
            }
        }

        let removed = inner.items.remove(key).map(|entry| entry.item);
        if let Some(names) = inner.by_namespace.get_mut(namespace) {
            names.remove(key.name());
            if names.is_empty() {
                inner.by_namespace.remove(namespace);
            }
        }

        trace!(kind = T::KIND, key = %key, "Cache remove");
        removed
    }

    /// Container currently owning the entity at `key`.
    pub fn owner(&self, key: &ObjectKey) -> Option<ObjectKey> {
        self.inner.read().items.get(key).map(|entry| entry.owner.clone())
    }

    /// Look up an entity by key.
    pub fn get(&self, key: &ObjectKey) -> Option<T> {
        self.inner.read().items.get(key).map(|entry| entry.item.clone())
    }

    /// Every entity in `namespace`, ordered by name. `None` lists the
    /// cluster-scoped entities.
    pub fn list_namespace(&self, namespace: Option<&str>) -> Vec<T> {
        let namespace = namespace.unwrap_or(CLUSTER_SCOPE);
        let inner = self.inner.read();
        inner
            .by_namespace
            .get(namespace)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|name| {
                        ObjectKey::new(Some(namespace), name)
                            .ok()
                            .and_then(|key| inner.items.get(&key).map(|entry| entry.item.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().items.is_empty()
    }

    /// Record that the initial listing has been ingested.
    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::Release);
    }

    /// Whether the initial listing has been ingested.
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

impl<T: Resource> Default for IndexedCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Resource> SourceLister<T> for IndexedCache<T> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<T>> {
        Ok(IndexedCache::get(self, key))
    }
}
