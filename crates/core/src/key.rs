//! Canonical object keys.
//!
//! A key is `"<namespace>/<name>"` for namespaced objects and `"<name>"` for
//! cluster-scoped ones. Both directions go through [`ObjectKey`] so that every
//! key produced by the ingester parses back to the same identity in the
//! reconciler.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::Result;

const SEPARATOR: char = '/';

/// Identity of an object: an optional namespace and a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    namespace: Option<String>,
    name: String,
}

impl ObjectKey {
    /// Build a key, rejecting identities that would not round-trip.
    ///
    /// An empty namespace is treated as cluster scope.
    pub fn new(namespace: Option<&str>, name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::malformed_input("object has no name"));
        }
        if name.contains(SEPARATOR) {
            return Err(Error::malformed_input(format!(
                "object name '{name}' contains '{SEPARATOR}'"
            )));
        }
        let namespace = match namespace {
            Some(ns) if ns.contains(SEPARATOR) => {
                return Err(Error::malformed_input(format!(
                    "namespace '{ns}' contains '{SEPARATOR}'"
                )));
            }
            Some(ns) if !ns.is_empty() => Some(ns.to_string()),
            _ => None,
        };
        Ok(Self {
            namespace,
            name: name.to_string(),
        })
    }

    /// Key for a namespaced object.
    pub fn namespaced(namespace: &str, name: &str) -> Result<Self> {
        Self::new(Some(namespace), name)
    }

    /// Key for a cluster-scoped object.
    pub fn cluster(name: &str) -> Result<Self> {
        Self::new(None, name)
    }

    /// Split a queue key back into its identity.
    pub fn parse(key: &str) -> Result<Self> {
        let mut parts = key.split(SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) => Self::new(None, name),
            (Some(namespace), Some(name), None) => {
                if namespace.is_empty() {
                    return Err(Error::malformed_input(format!(
                        "unexpected key format: '{key}'"
                    )));
                }
                Self::new(Some(namespace), name)
            }
            _ => Err(Error::malformed_input(format!(
                "unexpected key format: '{key}'"
            ))),
        }
    }

    /// The namespace, or `None` for cluster-scoped objects.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// The object name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the object lives in a namespace.
    #[must_use]
    pub const fn is_namespaced(&self) -> bool {
        self.namespace.is_some()
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}{SEPARATOR}{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
