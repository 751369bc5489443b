//! Watch-side plumbing for polsync.
//!
//! This crate holds everything between the watch stream and the reconciler:
//!
//! - **Object model**: source ([`origin`]) and derived ([`rbac`]) objects
//!   sharing [`ObjectMeta`]
//! - **Notifications**: typed watch events, with tombstones for deletions the
//!   watch cache already evicted
//! - **Indexed cache**: concurrent per-controller cache of source entities
//! - **Ingestion**: container notifications become cache writes and keys
//! - **Stores**: lister and client traits for the derived store, plus an
//!   in-memory implementation
//!
//! # Example
//!
//! ```ignore
//! use polsync_events::{EventIngester, IndexedCache, Policy, WatchEvent};
//! use std::sync::Arc;
//!
//! let cache = Arc::new(IndexedCache::new());
//! let ingester = EventIngester::<Policy>::new(cache.clone(), queue);
//! let report = ingester.handle(WatchEvent::Added(policy));
//! assert!(report.is_clean());
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod cache;
pub mod ingest;
pub mod notification;
pub mod origin;
pub mod rbac;
pub mod store;
pub mod types;

// Re-export main types
pub use cache::IndexedCache;
pub use ingest::{EventIngester, IngestReport, KeySink};
pub use notification::{Deleted, Tombstone, WatchEvent};
pub use origin::{ClusterPolicy, ClusterRole, ObjectReference, Policy, PolicyBinding, Role, RoleBinding};
pub use rbac::{RBAC_GROUP, RbacClusterRole, RbacRole, RbacRoleBinding, RoleRef, Subject};
pub use store::{
    ChangeType, DerivedChange, DerivedClient, DerivedLister, InMemoryDerivedStore, RBAC_API_PREFIX,
    SourceLister, TracingDerivedClient,
};
pub use types::{Container, ObjectMeta, Resource};
