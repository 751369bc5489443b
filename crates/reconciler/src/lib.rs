//! Reconciliation half of polsync.
//!
//! Keys flow from the ingester into a [`WorkQueue`]; a [`Controller`] pops
//! them and hands each to a [`SyncHandler`], normally a [`Reconciler`] for one
//! [`Projection`]:
//!
//! - **Convert**: pure mapping from a source entity to its derived shape
//! - **Reconcile**: create, update, or delete the derived object so it matches
//! - **Retry**: retryable failures come back with per-key exponential backoff
//! - **Self-heal**: a derived object whose update is rejected is deleted and
//!   recreated on the next attempt
//!
//! # Example
//!
//! ```ignore
//! use polsync_events::Policy;
//! use polsync_reconciler::{ControllerConfig, Pipeline, RoleProjection};
//! use tokio::sync::watch;
//!
//! let pipeline = Pipeline::<Policy, RoleProjection>::new(ControllerConfig::default())?;
//! pipeline.ingester().initial_list(&policies);
//!
//! let (stop, shutdown) = watch::channel(false);
//! let running = pipeline.spawn(shutdown);
//! pipeline.settle(Duration::from_secs(5)).await;
//! stop.send(true)?;
//! running.await??;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod config;
pub mod controller;
pub mod convert;
pub mod pipeline;
pub mod queue;
pub mod reconciler;

// Re-export main types
pub use config::ControllerConfig;
pub use controller::{CachesSynced, Controller, forward_derived_changes};
pub use convert::{ClusterRoleProjection, Projection, RoleBindingProjection, RoleProjection};
pub use pipeline::Pipeline;
pub use polsync_core::{Error, Result};
pub use queue::{ItemBackoff, WorkQueue, calculate_backoff};
pub use reconciler::{Reconciler, ReconcilerBuilder, SyncHandler, SyncOutcome};
