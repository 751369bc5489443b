//! Derived RBAC objects.

use serde::{Deserialize, Serialize};

use crate::types::{ObjectMeta, Resource};

/// API group of RBAC objects and of user and group subjects.
pub const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

/// An RBAC rule. Every list is kept sorted by the converter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyRule {
    pub verbs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub api_groups: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource_names: Vec<String>,
    #[serde(rename = "nonResourceURLs", skip_serializing_if = "Vec::is_empty")]
    pub non_resource_urls: Vec<String>,
}

/// A namespaced RBAC role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RbacRole {
    pub metadata: ObjectMeta,
    pub rules: Vec<PolicyRule>,
}

impl Resource for RbacRole {
    const KIND: &'static str = "rbac/Role";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// A cluster-scoped RBAC role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RbacClusterRole {
    pub metadata: ObjectMeta,
    pub rules: Vec<PolicyRule>,
}

impl Resource for RbacClusterRole {
    const KIND: &'static str = "rbac/ClusterRole";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Subject of an RBAC binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Subject {
    pub kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_group: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

/// Role an RBAC binding grants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoleRef {
    pub api_group: String,
    pub kind: String,
    pub name: String,
}

/// A namespaced RBAC role binding. `role_ref` cannot change after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RbacRoleBinding {
    pub metadata: ObjectMeta,
    pub subjects: Vec<Subject>,
    pub role_ref: RoleRef,
}

impl Resource for RbacRoleBinding {
    const KIND: &'static str = "rbac/RoleBinding";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn immutable_violation(&self, existing: &Self) -> Option<String> {
        (self.role_ref != existing.role_ref).then(|| {
            format!(
                "roleRef: cannot change from {}/{} to {}/{}",
                existing.role_ref.kind, existing.role_ref.name, self.role_ref.kind, self.role_ref.name
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(kind: &str, name: &str) -> RbacRoleBinding {
        RbacRoleBinding {
            metadata: ObjectMeta::namespaced("a", "b1"),
            subjects: Vec::new(),
            role_ref: RoleRef {
                api_group: RBAC_GROUP.to_string(),
                kind: kind.to_string(),
                name: name.to_string(),
            },
        }
    }

    #[test]
    fn test_role_ref_change_is_immutable_violation() {
        let existing = binding("Role", "viewer");
        let changed = binding("ClusterRole", "viewer");

        let violation = changed.immutable_violation(&existing);

        assert!(violation.is_some_and(|reason| reason.contains("roleRef")));
    }

    #[test]
    fn test_subject_change_is_allowed() {
        let existing = binding("Role", "viewer");
        let mut changed = existing.clone();
        changed.subjects.push(Subject {
            kind: "User".to_string(),
            api_group: RBAC_GROUP.to_string(),
            name: "alice".to_string(),
            namespace: String::new(),
        });

        assert!(changed.immutable_violation(&existing).is_none());
    }
}
