//! Command handlers.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use polsync_core::ObjectKey;
use polsync_events::{ClusterPolicy, DerivedClient, InMemoryDerivedStore, Policy, PolicyBinding, Resource};
use polsync_reconciler::{
    ClusterRoleProjection, ControllerConfig, Pipeline, RoleBindingProjection, RoleProjection,
};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cli::OutputFormat;
use crate::snapshot::{DerivedState, Snapshot};

/// Converge the derived stores of a snapshot and print them.
pub async fn sync(
    snapshot_path: &Path,
    config_path: Option<&Path>,
    timeout: Duration,
    format: OutputFormat,
) -> Result<()> {
    let config = match config_path {
        Some(path) => ControllerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ControllerConfig::default(),
    };
    let snapshot = Snapshot::load(snapshot_path)
        .with_context(|| format!("Failed to load snapshot {}", snapshot_path.display()))?;

    let state = converge(snapshot, config, timeout).await?;
    print(&state, format)
}

/// Run the three controllers over `snapshot` until they settle.
pub async fn converge(
    snapshot: Snapshot,
    config: ControllerConfig,
    timeout: Duration,
) -> Result<DerivedState> {
    let roles = Pipeline::<Policy, RoleProjection>::new(config.clone())?;
    let cluster_roles = Pipeline::<ClusterPolicy, ClusterRoleProjection>::new(config.clone())?;
    let bindings = Pipeline::<PolicyBinding, RoleBindingProjection>::new(config)?;

    seed(roles.store(), snapshot.existing.roles).await?;
    seed(cluster_roles.store(), snapshot.existing.cluster_roles).await?;
    seed(bindings.store(), snapshot.existing.role_bindings).await?;

    let reports = [
        roles.ingester().initial_list(&snapshot.policies),
        cluster_roles.ingester().initial_list(&snapshot.cluster_policies),
        bindings.ingester().initial_list(&snapshot.policy_bindings),
    ];
    for error in reports.iter().flat_map(|report| &report.errors) {
        warn!(error = %error, "Skipped source entity");
    }

    let (stop, shutdown) = watch::channel(false);
    let running = [
        roles.spawn(shutdown.clone()),
        cluster_roles.spawn(shutdown.clone()),
        bindings.spawn(shutdown),
    ];

    let settled = roles.settle(timeout).await
        & cluster_roles.settle(timeout).await
        & bindings.settle(timeout).await;

    stop.send(true).context("Controllers stopped early")?;
    for handle in running {
        handle.await.context("Controller task failed")??;
    }
    if !settled {
        warn!(timeout_secs = timeout.as_secs(), "Controllers did not settle; output may be partial");
    }

    let state = DerivedState {
        roles: roles.store().list().await,
        cluster_roles: cluster_roles.store().list().await,
        role_bindings: bindings.store().list().await,
    };
    info!(
        roles = state.roles.len(),
        cluster_roles = state.cluster_roles.len(),
        role_bindings = state.role_bindings.len(),
        "Sync complete"
    );
    Ok(state)
}

async fn seed<T: Resource>(store: &InMemoryDerivedStore<T>, objects: Vec<T>) -> Result<()> {
    for mut obj in objects {
        let meta = obj.meta().without_identity();
        *obj.meta_mut() = meta;
        store
            .create(obj)
            .await
            .with_context(|| format!("Failed to seed existing {}", T::KIND))?;
    }
    Ok(())
}

/// Parse and validate a configuration file, printing the effective settings.
pub fn validate_config(path: &Path) -> Result<()> {
    let config = ControllerConfig::load(path)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    print(&config, OutputFormat::Json)
}

/// Print the namespace/name split of `key`.
pub fn parse_key(key: &str) -> Result<()> {
    let key = ObjectKey::parse(key).with_context(|| format!("Cannot parse key '{key}'"))?;
    print(&key, OutputFormat::Json)
}

fn print<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value).context("Failed to render JSON")?,
        OutputFormat::Yaml => serde_yaml::to_string(value).context("Failed to render YAML")?,
    };
    println!("{rendered}");
    Ok(())
}
