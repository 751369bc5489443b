//! Conversion of source entities into their derived shape.
//!
//! Converters are pure: they read their input, return an owned value and
//! never fill in identity metadata.

use itertools::Itertools;
use polsync_core::{Error, Result};
use polsync_events::origin::{self, ClusterRole, ObjectReference, Role, RoleBinding};
use polsync_events::rbac::{self, RBAC_GROUP, RbacClusterRole, RbacRole, RbacRoleBinding, RoleRef, Subject};
use polsync_events::Resource;

/// A one-way mapping from a source kind to a derived kind.
pub trait Projection: Send + Sync + 'static {
    /// Source entity type.
    type Source: Resource;
    /// Derived entity type. Equality is full structural equality.
    type Derived: Resource + PartialEq;

    /// Controller and queue name.
    const NAME: &'static str;
    /// Plural resource name of the derived kind.
    const RESOURCE: &'static str;

    /// Convert a source entity.
    fn convert(source: &Self::Source) -> Result<Self::Derived>;
}

/// `Role` to RBAC `Role`.
pub struct RoleProjection;

impl Projection for RoleProjection {
    type Source = Role;
    type Derived = RbacRole;

    const NAME: &'static str = "origin-to-rbac-role";
    const RESOURCE: &'static str = "roles";

    fn convert(source: &Role) -> Result<RbacRole> {
        Ok(RbacRole {
            metadata: source.metadata.without_identity(),
            rules: convert_rules(source, &source.rules)?,
        })
    }
}

/// `ClusterRole` to RBAC `ClusterRole`.
pub struct ClusterRoleProjection;

impl Projection for ClusterRoleProjection {
    type Source = ClusterRole;
    type Derived = RbacClusterRole;

    const NAME: &'static str = "origin-to-rbac-clusterrole";
    const RESOURCE: &'static str = "clusterroles";

    fn convert(source: &ClusterRole) -> Result<RbacClusterRole> {
        Ok(RbacClusterRole {
            metadata: source.metadata.without_identity(),
            rules: convert_rules(source, &source.rules)?,
        })
    }
}

/// `RoleBinding` to RBAC `RoleBinding`.
pub struct RoleBindingProjection;

impl Projection for RoleBindingProjection {
    type Source = RoleBinding;
    type Derived = RbacRoleBinding;

    const NAME: &'static str = "origin-to-rbac-rolebinding";
    const RESOURCE: &'static str = "rolebindings";

    fn convert(source: &RoleBinding) -> Result<RbacRoleBinding> {
        let subjects = source
            .subjects
            .iter()
            .map(|subject| convert_subject(source, subject))
            .collect::<Result<Vec<_>>>()?;

        Ok(RbacRoleBinding {
            metadata: source.metadata.without_identity(),
            subjects,
            role_ref: convert_role_ref(source)?,
        })
    }
}

fn conversion_error<R: Resource>(source: &R, reason: impl Into<String>) -> Error {
    let key = source
        .key()
        .map_or_else(|_| source.meta().name.clone(), |k| k.to_string());
    Error::conversion_failed(R::KIND, key, reason)
}

fn convert_rules<R: Resource>(source: &R, rules: &[origin::PolicyRule]) -> Result<Vec<rbac::PolicyRule>> {
    rules.iter().map(|rule| convert_rule(source, rule)).collect()
}

fn convert_rule<R: Resource>(source: &R, rule: &origin::PolicyRule) -> Result<rbac::PolicyRule> {
    if rule.attribute_restrictions.is_some() {
        return Err(conversion_error(
            source,
            "rules with attribute restrictions have no RBAC equivalent",
        ));
    }

    // Sets iterate in order already; api groups arrive as a list.
    Ok(rbac::PolicyRule {
        verbs: rule.verbs.iter().cloned().collect(),
        api_groups: rule.api_groups.iter().cloned().sorted().dedup().collect(),
        resources: rule.resources.iter().cloned().collect(),
        resource_names: rule.resource_names.iter().cloned().collect(),
        non_resource_urls: rule.non_resource_urls.iter().cloned().collect(),
    })
}

fn convert_subject(binding: &RoleBinding, subject: &ObjectReference) -> Result<Subject> {
    let (kind, api_group, namespace) = match subject.kind.as_str() {
        "User" | "SystemUser" => ("User", RBAC_GROUP, String::new()),
        "Group" | "SystemGroup" => ("Group", RBAC_GROUP, String::new()),
        "ServiceAccount" => {
            let namespace = if subject.namespace.is_empty() {
                binding.metadata.namespace.clone().unwrap_or_default()
            } else {
                subject.namespace.clone()
            };
            ("ServiceAccount", "", namespace)
        }
        other => {
            return Err(conversion_error(
                binding,
                format!("unsupported subject kind '{other}' for '{}'", subject.name),
            ));
        }
    };

    Ok(Subject {
        kind: kind.to_string(),
        api_group: api_group.to_string(),
        name: subject.name.clone(),
        namespace,
    })
}

fn convert_role_ref(binding: &RoleBinding) -> Result<RoleRef> {
    let role_ref = &binding.role_ref;
    if role_ref.name.is_empty() {
        return Err(conversion_error(binding, "roleRef has no name"));
    }

    let kind = if role_ref.namespace.is_empty() {
        "ClusterRole"
    } else if binding.metadata.namespace.as_deref() == Some(role_ref.namespace.as_str()) {
        "Role"
    } else {
        return Err(conversion_error(
            binding,
            format!(
                "roleRef namespace '{}' differs from binding namespace",
                role_ref.namespace
            ),
        ));
    };

    Ok(RoleRef {
        api_group: RBAC_GROUP.to_string(),
        kind: kind.to_string(),
        name: role_ref.name.clone(),
    })
}
