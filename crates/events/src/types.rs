//! Object metadata and the traits shared by source and derived objects.

use std::collections::BTreeMap;
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use polsync_core::{ObjectKey, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Standard object metadata.
///
/// `uid`, `resource_version`, `creation_timestamp` and `self_link` are
/// identity metadata owned by the store that holds the object. Everything
/// else is payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub self_link: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Metadata for a namespaced object.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    /// Metadata for a cluster-scoped object.
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Canonical key for this object.
    pub fn key(&self) -> Result<ObjectKey> {
        ObjectKey::new(self.namespace.as_deref(), &self.name)
    }

    /// Copy the store-owned identity fields from `other`.
    pub fn copy_identity_from(&mut self, other: &Self) {
        self.self_link.clone_from(&other.self_link);
        self.uid.clone_from(&other.uid);
        self.resource_version.clone_from(&other.resource_version);
        self.creation_timestamp = other.creation_timestamp;
    }

    /// Same payload metadata (name, namespace, labels, annotations) with the
    /// identity fields left empty.
    #[must_use]
    pub fn without_identity(&self) -> Self {
        Self {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            labels: self.labels.clone(),
            annotations: self.annotations.clone(),
            ..Self::default()
        }
    }
}

/// An object addressable by key, stored in a cache or a store.
pub trait Resource: Clone + Debug + Send + Sync + 'static {
    /// Kind name used in logs and errors.
    const KIND: &'static str;

    /// Object metadata.
    fn meta(&self) -> &ObjectMeta;

    /// Mutable object metadata.
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Canonical key; fails for malformed identity.
    fn key(&self) -> Result<ObjectKey> {
        self.meta().key()
    }

    /// Check that `self` may replace `existing` in a store.
    ///
    /// Returns the reason when a field the store treats as immutable differs.
    fn immutable_violation(&self, _existing: &Self) -> Option<String> {
        None
    }
}

/// An aggregate object whose nested entities are reconciled individually.
pub trait Container: Clone + Debug + DeserializeOwned + Send + Sync + 'static {
    /// The nested entity type.
    type Item: Resource;

    /// Kind name used in logs and errors.
    const KIND: &'static str;

    /// Container metadata.
    fn meta(&self) -> &ObjectMeta;

    /// Every nested entity.
    fn items(&self) -> &[Self::Item];
}
