//! Store traits consumed by the reconciler and an in-memory derived store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use polsync_core::{Error, ObjectKey, Result};
use tokio::sync::{RwLock, broadcast};
use ulid::Ulid;

use crate::types::Resource;

/// Path prefix of every self link the in-memory store assigns.
pub const RBAC_API_PREFIX: &str = "/apis/rbac.authorization.k8s.io/v1";

/// Read access to source entities. `Ok(None)` means not found.
#[async_trait]
pub trait SourceLister<T: Resource>: Send + Sync {
    /// Look up the entity for `key`.
    async fn get(&self, key: &ObjectKey) -> Result<Option<T>>;
}

/// Read access to derived entities. A missing object is
/// [`Error::NotFound`].
#[async_trait]
pub trait DerivedLister<T: Resource>: Send + Sync {
    /// Look up the object for `key`.
    async fn get(&self, key: &ObjectKey) -> Result<T>;
}

/// Write access to the derived store.
#[async_trait]
pub trait DerivedClient<T: Resource>: Send + Sync {
    /// Create `obj`; the store assigns identity metadata.
    async fn create(&self, obj: T) -> Result<T>;

    /// Replace the stored object. [`Error::Invalid`] reports a rejected
    /// semantic change.
    async fn update(&self, obj: T) -> Result<T>;

    /// Delete the object for `key`.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;
}

#[async_trait]
impl<T: Resource, C: DerivedClient<T> + ?Sized> DerivedClient<T> for std::sync::Arc<C> {
    async fn create(&self, obj: T) -> Result<T> {
        (**self).create(obj).await
    }

    async fn update(&self, obj: T) -> Result<T> {
        (**self).update(obj).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        (**self).delete(key).await
    }
}

/// What happened to a derived object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

/// Notice published after every successful write to an in-memory store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedChange {
    pub key: ObjectKey,
    pub change: ChangeType,
}

/// Derived store held in memory.
///
/// Behaves like an API server for the fields the reconciler relies on:
/// assigns `uid`, `resource_version`, `creation_timestamp` and `self_link`,
/// rejects updates with a stale resource version, and rejects updates that
/// touch immutable fields.
pub struct InMemoryDerivedStore<T: Resource> {
    objects: RwLock<BTreeMap<ObjectKey, T>>,
    next_version: AtomicU64,
    resource: String,
    changes: broadcast::Sender<DerivedChange>,
}

impl<T: Resource> InMemoryDerivedStore<T> {
    /// Create an empty store for the plural `resource` name used in self
    /// links, e.g. `roles`.
    pub fn new(resource: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(1024);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            next_version: AtomicU64::new(1),
            resource: resource.into(),
            changes,
        }
    }

    /// Subscribe to change notices.
    pub fn subscribe(&self) -> broadcast::Receiver<DerivedChange> {
        self.changes.subscribe()
    }

    /// Every stored object, ordered by key.
    pub async fn list(&self) -> Vec<T> {
        self.objects.read().await.values().cloned().collect()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn next_resource_version(&self) -> String {
        self.next_version.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn self_link(&self, key: &ObjectKey) -> String {
        match key.namespace() {
            Some(ns) => format!(
                "{RBAC_API_PREFIX}/namespaces/{ns}/{}/{}",
                self.resource,
                key.name()
            ),
            None => format!("{RBAC_API_PREFIX}/{}/{}", self.resource, key.name()),
        }
    }

    fn publish(&self, key: ObjectKey, change: ChangeType) {
        // No subscribers is fine.
        let _ = self.changes.send(DerivedChange { key, change });
    }
}

#[async_trait]
impl<T: Resource> DerivedLister<T> for InMemoryDerivedStore<T> {
    async fn get(&self, key: &ObjectKey) -> Result<T> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(T::KIND, key.to_string()))
    }
}

#[async_trait]
impl<T: Resource> DerivedClient<T> for InMemoryDerivedStore<T> {
    async fn create(&self, mut obj: T) -> Result<T> {
        let key = obj.key()?;
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(Error::already_exists(T::KIND, key.to_string()));
        }
        if !obj.meta().resource_version.is_empty() {
            return Err(Error::invalid(
                T::KIND,
                key.to_string(),
                "resourceVersion must not be set on create",
            ));
        }

        let meta = obj.meta_mut();
        meta.uid = Ulid::new().to_string().to_lowercase();
        meta.resource_version = self.next_resource_version();
        meta.creation_timestamp = Some(Utc::now());
        meta.self_link = self.self_link(&key);

        objects.insert(key.clone(), obj.clone());
        drop(objects);
        self.publish(key, ChangeType::Created);
        Ok(obj)
    }

    async fn update(&self, mut obj: T) -> Result<T> {
        let key = obj.key()?;
        let mut objects = self.objects.write().await;
        let existing = objects
            .get(&key)
            .ok_or_else(|| Error::not_found(T::KIND, key.to_string()))?;

        if obj.meta().resource_version != existing.meta().resource_version {
            return Err(Error::conflict(
                T::KIND,
                key.to_string(),
                format!(
                    "resourceVersion {} does not match stored {}",
                    obj.meta().resource_version,
                    existing.meta().resource_version
                ),
            ));
        }
        if obj.meta().uid != existing.meta().uid {
            return Err(Error::invalid(T::KIND, key.to_string(), "uid is immutable"));
        }
        if let Some(reason) = obj.immutable_violation(existing) {
            return Err(Error::invalid(T::KIND, key.to_string(), reason));
        }

        let creation_timestamp = existing.meta().creation_timestamp;
        let meta = obj.meta_mut();
        meta.creation_timestamp = creation_timestamp;
        meta.self_link = self.self_link(&key);
        meta.resource_version = self.next_resource_version();

        objects.insert(key.clone(), obj.clone());
        drop(objects);
        self.publish(key, ChangeType::Updated);
        Ok(obj)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let removed = self.objects.write().await.remove(key);
        match removed {
            Some(_) => {
                self.publish(key.clone(), ChangeType::Deleted);
                Ok(())
            }
            None => Err(Error::not_found(T::KIND, key.to_string())),
        }
    }
}

/// A wrapper that adds tracing to a derived client.
pub struct TracingDerivedClient<C> {
    inner: C,
}

impl<C> TracingDerivedClient<C> {
    /// Create a new tracing client.
    pub const fn new(inner: C) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: Resource, C: DerivedClient<T>> DerivedClient<T> for TracingDerivedClient<C> {
    async fn create(&self, obj: T) -> Result<T> {
        tracing::debug!(kind = T::KIND, name = %obj.meta().name, "Creating derived object");
        let result = self.inner.create(obj).await;
        if let Ok(ref created) = result {
            tracing::trace!(
                kind = T::KIND,
                uid = %created.meta().uid,
                resource_version = %created.meta().resource_version,
                "Derived object created"
            );
        }
        result
    }

    async fn update(&self, obj: T) -> Result<T> {
        tracing::debug!(
            kind = T::KIND,
            name = %obj.meta().name,
            resource_version = %obj.meta().resource_version,
            "Updating derived object"
        );
        self.inner.update(obj).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        tracing::debug!(kind = T::KIND, key = %key, "Deleting derived object");
        self.inner.delete(key).await
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::rbac::{RBAC_GROUP, RbacRole, RbacRoleBinding, RoleRef};
    use crate::types::ObjectMeta;

    fn role(name: &str) -> RbacRole {
        RbacRole {
            metadata: ObjectMeta::namespaced("a", name),
            rules: Vec::new(),
        }
    }

    fn store() -> InMemoryDerivedStore<RbacRole> {
        InMemoryDerivedStore::new("roles")
    }

    #[tokio::test]
    async fn test_create_assigns_identity() {
        let store = store();
        let created = store.create(role("r1")).await.unwrap();

        assert!(!created.metadata.uid.is_empty());
        assert_eq!(created.metadata.resource_version, "1");
        assert!(created.metadata.creation_timestamp.is_some());
        assert_eq!(
            created.metadata.self_link,
            "/apis/rbac.authorization.k8s.io/v1/namespaces/a/roles/r1"
        );
    }

    #[tokio::test]
    async fn test_create_twice_already_exists() {
        let store = store();
        store.create(role("r1")).await.unwrap();

        let result = store.create(role("r1")).await;

        assert!(matches!(result, Err(Error::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = store();
        let key = ObjectKey::namespaced("a", "r1").unwrap();

        let result = store.get(&key).await;

        assert!(result.is_err_and(|e| e.is_not_found()));
    }

    #[tokio::test]
    async fn test_update_preserves_identity_and_bumps_version() {
        let store = store();
        let created = store.create(role("r1")).await.unwrap();

        let mut changed = created.clone();
        changed.metadata.labels.insert("k".to_string(), "v".to_string());
        let updated = store.update(changed).await.unwrap();

        assert_eq!(updated.metadata.uid, created.metadata.uid);
        assert_eq!(
            updated.metadata.creation_timestamp,
            created.metadata.creation_timestamp
        );
        assert_ne!(
            updated.metadata.resource_version,
            created.metadata.resource_version
        );
    }

    #[tokio::test]
    async fn test_update_with_stale_version_conflicts() {
        let store = store();
        let created = store.create(role("r1")).await.unwrap();
        store.update(created.clone()).await.unwrap();

        let result = store.update(created).await;

        assert!(matches!(result, Err(Error::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_update_of_immutable_field_is_invalid() {
        let store: InMemoryDerivedStore<RbacRoleBinding> =
            InMemoryDerivedStore::new("rolebindings");
        let binding = RbacRoleBinding {
            metadata: ObjectMeta::namespaced("a", "b1"),
            subjects: Vec::new(),
            role_ref: RoleRef {
                api_group: RBAC_GROUP.to_string(),
                kind: "Role".to_string(),
                name: "viewer".to_string(),
            },
        };
        let mut created = store.create(binding).await.unwrap();
        created.role_ref.name = "editor".to_string();

        let result = store.update(created).await;

        assert!(result.is_err_and(|e| e.is_invalid()));
    }

    #[tokio::test]
    async fn test_delete_publishes_change() {
        let store = store();
        let mut changes = store.subscribe();
        store.create(role("r1")).await.unwrap();
        let key = ObjectKey::namespaced("a", "r1").unwrap();

        store.delete(&key).await.unwrap();

        assert_eq!(changes.recv().await.unwrap().change, ChangeType::Created);
        assert_eq!(changes.recv().await.unwrap().change, ChangeType::Deleted);
        assert!(store.delete(&key).await.is_err_and(|e| e.is_not_found()));
    }

    #[tokio::test]
    async fn test_tracing_client_delegates() {
        let inner = store();
        let client = TracingDerivedClient::new(inner);

        let created = client.create(role("r1")).await.unwrap();

        assert_eq!(created.metadata.name, "r1");
    }
}
