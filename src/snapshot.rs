//! YAML snapshots consumed and produced by `polsync sync`.

use std::path::Path;

use polsync_core::{Error, Result};
use polsync_events::{ClusterPolicy, Policy, PolicyBinding, RbacClusterRole, RbacRole, RbacRoleBinding};
use serde::{Deserialize, Serialize};

/// Source containers plus any derived objects already present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Snapshot {
    pub policies: Vec<Policy>,
    pub cluster_policies: Vec<ClusterPolicy>,
    pub policy_bindings: Vec<PolicyBinding>,
    /// Derived objects seeded into the stores before the controllers start.
    pub existing: DerivedState,
}

impl Snapshot {
    /// Parse a YAML document.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_yaml::from_str(s).map_err(|e| Error::yaml_parse_failed(e.to_string()))
    }

    /// Read and parse a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        Self::from_yaml_str(&contents)
    }
}

/// Contents of the three derived stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DerivedState {
    pub roles: Vec<RbacRole>,
    pub cluster_roles: Vec<RbacClusterRole>,
    pub role_bindings: Vec<RbacRoleBinding>,
}
