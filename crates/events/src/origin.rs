//! Source-of-truth authorization objects.
//!
//! Roles and bindings never arrive alone: a [`Policy`] carries the roles of a
//! namespace, a [`ClusterPolicy`] the cluster roles, and a [`PolicyBinding`]
//! the role bindings of a namespace.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{Container, ObjectMeta, Resource};

/// A single authorization rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyRule {
    pub verbs: BTreeSet<String>,
    /// Opaque restrictions with no counterpart in the derived API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_restrictions: Option<serde_json::Value>,
    #[serde(rename = "apiGroups")]
    pub api_groups: Vec<String>,
    pub resources: BTreeSet<String>,
    pub resource_names: BTreeSet<String>,
    #[serde(rename = "nonResourceURLs")]
    pub non_resource_urls: BTreeSet<String>,
}

impl PolicyRule {
    /// Rule granting `verbs` on `resources` in `api_groups`.
    pub fn new<'a>(
        verbs: impl IntoIterator<Item = &'a str>,
        api_groups: impl IntoIterator<Item = &'a str>,
        resources: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            verbs: verbs.into_iter().map(str::to_string).collect(),
            api_groups: api_groups.into_iter().map(str::to_string).collect(),
            resources: resources.into_iter().map(str::to_string).collect(),
            ..Self::default()
        }
    }
}

/// A namespaced role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Role {
    pub metadata: ObjectMeta,
    pub rules: Vec<PolicyRule>,
}

impl Resource for Role {
    const KIND: &'static str = "Role";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// A cluster-scoped role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterRole {
    pub metadata: ObjectMeta,
    pub rules: Vec<PolicyRule>,
}

impl Resource for ClusterRole {
    const KIND: &'static str = "ClusterRole";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Reference to a user, group, service account or role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectReference {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub name: String,
}

impl ObjectReference {
    /// Reference of the given kind.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the namespace.
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

/// A namespaced binding of subjects to a role.
///
/// A `role_ref` with a namespace points at a [`Role`], one without at a
/// [`ClusterRole`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoleBinding {
    pub metadata: ObjectMeta,
    pub subjects: Vec<ObjectReference>,
    pub role_ref: ObjectReference,
}

impl Resource for RoleBinding {
    const KIND: &'static str = "RoleBinding";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// All roles of one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub metadata: ObjectMeta,
    pub roles: Vec<Role>,
}

impl Container for Policy {
    type Item = Role;
    const KIND: &'static str = "Policy";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn items(&self) -> &[Role] {
        &self.roles
    }
}

/// All cluster roles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterPolicy {
    pub metadata: ObjectMeta,
    pub roles: Vec<ClusterRole>,
}

impl Container for ClusterPolicy {
    type Item = ClusterRole;
    const KIND: &'static str = "ClusterPolicy";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn items(&self) -> &[ClusterRole] {
        &self.roles
    }
}

/// Role bindings of one namespace that point at the same policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyBinding {
    pub metadata: ObjectMeta,
    pub role_bindings: Vec<RoleBinding>,
}

impl Container for PolicyBinding {
    type Item = RoleBinding;
    const KIND: &'static str = "PolicyBinding";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn items(&self) -> &[RoleBinding] {
        &self.role_bindings
    }
}
