//! Watch notifications for container objects.

use polsync_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::types::Container;

/// Last known state of an object that left the watch cache before its
/// delete notification was delivered.
///
/// The snapshot is untyped: the watch layer does not guarantee it holds the
/// kind the handler expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub key: String,
    pub last_known: serde_json::Value,
}

impl Tombstone {
    /// Tombstone carrying a serialized snapshot of `obj`.
    pub fn of<C: Container + Serialize>(key: impl Into<String>, obj: &C) -> Result<Self> {
        let last_known =
            serde_json::to_value(obj).map_err(|e| Error::json_parse_failed(e.to_string()))?;
        Ok(Self {
            key: key.into(),
            last_known,
        })
    }
}

/// Payload of a delete notification.
#[derive(Debug, Clone)]
pub enum Deleted<C> {
    /// The object as it was when deleted.
    Object(C),
    /// The object had already been evicted.
    Tombstone(Tombstone),
}

impl<C: Container> Deleted<C> {
    /// Recover the deleted container.
    pub fn decode(self) -> Result<C> {
        match self {
            Self::Object(obj) => Ok(obj),
            Self::Tombstone(tombstone) => serde_json::from_value(tombstone.last_known)
                .map_err(|e| {
                    Error::malformed_input(format!(
                        "couldn't get {} from tombstone '{}': {e}",
                        C::KIND,
                        tombstone.key
                    ))
                }),
        }
    }
}

/// A change notification for one container.
#[derive(Debug, Clone)]
pub enum WatchEvent<C> {
    Added(C),
    Modified { old: C, new: C },
    Deleted(Deleted<C>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::{Policy, Role};
    use crate::types::ObjectMeta;

    fn policy() -> Policy {
        Policy {
            metadata: ObjectMeta::namespaced("a", "default"),
            roles: vec![Role {
                metadata: ObjectMeta::namespaced("a", "r1"),
                rules: Vec::new(),
            }],
        }
    }

    #[test]
    fn test_decode_live_object() {
        let decoded = Deleted::Object(policy()).decode();
        assert_eq!(decoded, Ok(policy()));
    }

    #[test]
    fn test_decode_tombstone() {
        let tombstone = Tombstone::of("a/default", &policy());
        let decoded = tombstone.and_then(|t| Deleted::<Policy>::Tombstone(t).decode());
        assert_eq!(decoded, Ok(policy()));
    }

    #[test]
    fn test_undecodable_tombstone_is_malformed() {
        let tombstone = Tombstone {
            key: "a/default".to_string(),
            last_known: serde_json::json!("not a policy"),
        };

        let decoded = Deleted::<Policy>::Tombstone(tombstone).decode();

        assert!(matches!(decoded, Err(Error::MalformedInput { .. })));
    }
}
