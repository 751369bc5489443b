//! Turns container notifications into cache writes and reconciliation keys.

use std::collections::BTreeSet;
use std::sync::Arc;

use polsync_core::{Error, ObjectKey, ResultExt};
use tracing::{debug, error};

use crate::cache::IndexedCache;
use crate::notification::{Deleted, WatchEvent};
use crate::types::{Container, Resource};

/// Destination for reconciliation keys. Adding a key twice must be harmless.
pub trait KeySink: Send + Sync {
    /// Request reconciliation of `key`.
    fn enqueue(&self, key: &str);
}

/// What one notification produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Keys handed to the sink, in order.
    pub enqueued: Vec<String>,
    /// Entities or payloads that were skipped.
    pub errors: Vec<Error>,
}

impl IngestReport {
    /// Whether every entity was ingested.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Extracts nested entities from container notifications.
pub struct EventIngester<C: Container> {
    cache: Arc<IndexedCache<C::Item>>,
    sink: Arc<dyn KeySink>,
}

impl<C: Container> EventIngester<C> {
    /// Create an ingester writing into `cache` and enqueueing on `sink`.
    pub fn new(cache: Arc<IndexedCache<C::Item>>, sink: Arc<dyn KeySink>) -> Self {
        Self { cache, sink }
    }

    /// The cache this ingester writes to.
    pub fn cache(&self) -> &Arc<IndexedCache<C::Item>> {
        &self.cache
    }

    /// Dispatch a watch event to the matching callback.
    pub fn handle(&self, event: WatchEvent<C>) -> IngestReport {
        match event {
            WatchEvent::Added(obj) => self.on_add(&obj),
            WatchEvent::Modified { old, new } => self.on_update(&old, &new),
            WatchEvent::Deleted(deleted) => self.on_delete(deleted),
        }
    }

    /// Ingest the initial listing and mark the cache synced.
    pub fn initial_list(&self, containers: &[C]) -> IngestReport {
        let mut report = IngestReport::default();
        for container in containers {
            let partial = self.on_add(container);
            report.enqueued.extend(partial.enqueued);
            report.errors.extend(partial.errors);
        }
        self.cache.mark_synced();
        debug!(
            kind = C::KIND,
            containers = containers.len(),
            keys = report.enqueued.len(),
            "Initial listing ingested"
        );
        report
    }

    /// A container appeared.
    pub fn on_add(&self, container: &C) -> IngestReport {
        let mut report = IngestReport::default();
        if let Some(owner) = Self::owner(container, &mut report) {
            self.upsert_all(&owner, container, &mut report);
        }
        report
    }

    /// A container changed. Entities dropped from it are removed from the
    /// cache so their derived objects get deleted, unless another container
    /// lists them by now.
    pub fn on_update(&self, old: &C, new: &C) -> IngestReport {
        let mut report = IngestReport::default();
        let Some(owner) = Self::owner(new, &mut report) else {
            return report;
        };
        let current = self.upsert_all(&owner, new, &mut report);

        for item in old.items() {
            // Malformed entries of the old state were already reported once.
            let Ok(key) = item.key() else { continue };
            if !current.contains(&key) {
                self.remove_and_enqueue(&key, &owner, &mut report);
            }
        }
        report
    }

    /// A container was deleted, possibly only known through a tombstone.
    pub fn on_delete(&self, deleted: Deleted<C>) -> IngestReport {
        let mut report = IngestReport::default();
        let container = match deleted.decode() {
            Ok(container) => container,
            Err(e) => {
                error!(kind = C::KIND, error = %e, "Irrecoverable deleted object");
                report.errors.push(e);
                return report;
            }
        };
        let Some(owner) = Self::owner(&container, &mut report) else {
            return report;
        };

        for item in container.items() {
            let key = item.key().inspect_error(|e| {
                error!(kind = <C::Item as Resource>::KIND, error = %e, "Skipping entity");
            });
            match key {
                Ok(key) => self.remove_and_enqueue(&key, &owner, &mut report),
                Err(e) => report.errors.push(e),
            }
        }
        report
    }

    fn owner(container: &C, report: &mut IngestReport) -> Option<ObjectKey> {
        let owner = container.meta().key().inspect_error(|e| {
            error!(kind = C::KIND, error = %e, "Skipping container");
        });
        if let Err(e) = &owner {
            report.errors.push(e.clone());
        }
        owner.ok()
    }

    fn upsert_all(
        &self,
        owner: &ObjectKey,
        container: &C,
        report: &mut IngestReport,
    ) -> BTreeSet<ObjectKey> {
        let mut keys = BTreeSet::new();
        for item in container.items() {
            let upserted = self.cache.upsert(owner, item.clone());
            if let Err(e) = &upserted {
                report.errors.push(e.clone());
            }
            // Logs the error; the rest of the container still goes through.
            if let Some(key) = upserted.into_option_logged() {
                self.enqueue(&key, report);
                keys.insert(key);
            }
        }
        keys
    }

    /// Enqueue even when the entity moved, so the reconciler re-reads it.
    fn remove_and_enqueue(&self, key: &ObjectKey, owner: &ObjectKey, report: &mut IngestReport) {
        self.cache.remove(key, owner);
        self.enqueue(key, report);
    }

    fn enqueue(&self, key: &ObjectKey, report: &mut IngestReport) {
        let key = key.to_string();
        self.sink.enqueue(&key);
        report.enqueued.push(key);
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::notification::Tombstone;
    use crate::origin::{ObjectReference, Policy, PolicyBinding, PolicyRule, Role, RoleBinding};
    use crate::types::ObjectMeta;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        keys: Mutex<Vec<String>>,
    }

    impl KeySink for RecordingSink {
        fn enqueue(&self, key: &str) {
            self.keys.lock().push(key.to_string());
        }
    }

    fn role(name: &str) -> Role {
        Role {
            metadata: ObjectMeta::namespaced("a", name),
            rules: vec![PolicyRule::new(["get"], [""], ["pods"])],
        }
    }

    fn policy(names: &[&str]) -> Policy {
        Policy {
            metadata: ObjectMeta::namespaced("a", "default"),
            roles: names.iter().map(|n| role(n)).collect(),
        }
    }

    fn setup() -> (EventIngester<Policy>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let ingester = EventIngester::new(Arc::new(IndexedCache::new()), sink.clone());
        (ingester, sink)
    }

    /// Binding container in namespace "a" named after its role ref's
    /// namespace, as in ":default" and "a:default".
    fn binding_policy(name: &str, bindings: &[&str]) -> PolicyBinding {
        PolicyBinding {
            metadata: ObjectMeta::namespaced("a", name),
            role_bindings: bindings
                .iter()
                .map(|b| RoleBinding {
                    metadata: ObjectMeta::namespaced("a", *b),
                    subjects: vec![ObjectReference::new("User", "alice")],
                    role_ref: ObjectReference::new("", "viewer"),
                })
                .collect(),
        }
    }

    #[test]
    fn test_add_upserts_and_enqueues_every_role() {
        let (ingester, sink) = setup();

        let report = ingester.on_add(&policy(&["r1", "r2"]));

        assert!(report.is_clean());
        assert_eq!(*sink.keys.lock(), vec!["a/r1", "a/r2"]);
        assert_eq!(ingester.cache().len(), 2);
    }

    #[test]
    fn test_malformed_entity_does_not_block_others() {
        let (ingester, sink) = setup();

        let report = ingester.on_add(&policy(&["r1", "", "r3"]));

        assert_eq!(report.errors.len(), 1);
        assert_eq!(*sink.keys.lock(), vec!["a/r1", "a/r3"]);
    }

    #[test]
    fn test_update_removes_dropped_roles() {
        let (ingester, sink) = setup();
        let old = policy(&["r1", "r2"]);
        ingester.on_add(&old);
        sink.keys.lock().clear();

        let report = ingester.on_update(&old, &policy(&["r1"]));

        assert_eq!(report.enqueued, vec!["a/r1", "a/r2"]);
        let r2 = ObjectKey::namespaced("a", "r2").unwrap();
        assert!(ingester.cache().get(&r2).is_none());
    }

    #[test]
    fn test_delete_from_tombstone() {
        let (ingester, sink) = setup();
        let deleted = policy(&["r1"]);
        ingester.on_add(&deleted);
        sink.keys.lock().clear();

        let tombstone = Tombstone::of("a/default", &deleted).unwrap();
        let report = ingester.on_delete(Deleted::Tombstone(tombstone));

        assert!(report.is_clean());
        assert_eq!(*sink.keys.lock(), vec!["a/r1"]);
        assert!(ingester.cache().is_empty());
    }

    #[test]
    fn test_undecodable_delete_is_reported() {
        let (ingester, sink) = setup();
        let tombstone = Tombstone {
            key: "a/default".to_string(),
            last_known: serde_json::json!(42),
        };

        let report = ingester.on_delete(Deleted::Tombstone(tombstone));

        assert_eq!(report.errors.len(), 1);
        assert!(sink.keys.lock().is_empty());
    }

    #[test]
    fn test_initial_list_marks_synced() {
        let (ingester, _sink) = setup();
        assert!(!ingester.cache().has_synced());

        ingester.initial_list(&[policy(&["r1"])]);

        assert!(ingester.cache().has_synced());
    }

    #[test]
    fn test_handle_dispatches_modified() {
        let (ingester, sink) = setup();

        ingester.handle(WatchEvent::Modified {
            old: policy(&[]),
            new: policy(&["r1"]),
        });

        assert_eq!(*sink.keys.lock(), vec!["a/r1"]);
    }

    #[test]
    fn test_delete_of_live_object() {
        let (ingester, sink) = setup();
        let deleted = policy(&["r1", "r2"]);
        ingester.on_add(&deleted);
        sink.keys.lock().clear();

        let report = ingester.on_delete(Deleted::Object(deleted));

        assert!(report.is_clean());
        assert_eq!(*sink.keys.lock(), vec!["a/r1", "a/r2"]);
        assert!(ingester.cache().is_empty());
    }

    #[test]
    fn test_delete_skips_malformed_entity_only() {
        let (ingester, sink) = setup();
        ingester.on_add(&policy(&["r1", "r3"]));
        sink.keys.lock().clear();

        let report = ingester.on_delete(Deleted::Object(policy(&["r1", "", "r3"])));

        assert_eq!(report.errors.len(), 1);
        assert_eq!(*sink.keys.lock(), vec!["a/r1", "a/r3"]);
        assert!(ingester.cache().is_empty());
    }

    #[test]
    fn test_binding_moved_between_containers_stays_cached() {
        let sink = Arc::new(RecordingSink::default());
        let ingester: EventIngester<PolicyBinding> =
            EventIngester::new(Arc::new(IndexedCache::new()), sink.clone());
        let b1 = ObjectKey::namespaced("a", "b1").unwrap();
        ingester.initial_list(&[
            binding_policy(":default", &["b1"]),
            binding_policy("a:default", &[]),
        ]);
        sink.keys.lock().clear();

        // The gaining container's update is delivered before the losing one's.
        ingester.on_update(
            &binding_policy("a:default", &[]),
            &binding_policy("a:default", &["b1"]),
        );
        let report = ingester.on_update(
            &binding_policy(":default", &["b1"]),
            &binding_policy(":default", &[]),
        );

        assert!(report.is_clean());
        assert_eq!(report.enqueued, vec!["a/b1"]);
        assert!(ingester.cache().get(&b1).is_some());
        assert_eq!(
            ingester.cache().owner(&b1),
            Some(ObjectKey::namespaced("a", "a:default").unwrap())
        );
        assert_eq!(*sink.keys.lock(), vec!["a/b1", "a/b1"]);
    }

    #[test]
    fn test_binding_moved_in_order_is_recached() {
        let sink = Arc::new(RecordingSink::default());
        let ingester: EventIngester<PolicyBinding> =
            EventIngester::new(Arc::new(IndexedCache::new()), sink);
        let b1 = ObjectKey::namespaced("a", "b1").unwrap();
        ingester.initial_list(&[binding_policy(":default", &["b1"])]);

        ingester.on_update(
            &binding_policy(":default", &["b1"]),
            &binding_policy(":default", &[]),
        );
        assert!(ingester.cache().get(&b1).is_none());
        ingester.on_update(
            &binding_policy("a:default", &[]),
            &binding_policy("a:default", &["b1"]),
        );

        assert!(ingester.cache().get(&b1).is_some());
    }

    #[test]
    fn test_container_without_name_is_reported() {
        let (ingester, sink) = setup();
        let mut nameless = policy(&["r1"]);
        nameless.metadata.name = String::new();

        let report = ingester.on_add(&nameless);

        assert_eq!(report.errors.len(), 1);
        assert!(sink.keys.lock().is_empty());
        assert!(ingester.cache().is_empty());
    }
}
