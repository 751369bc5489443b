//! # polsync
//!
//! Keeps RBAC roles, cluster roles and role bindings in line with the origin
//! policy objects they are derived from.
//!
//! ## Commands
//!
//! - `sync` runs every controller over a YAML snapshot and prints the
//!   converged RBAC objects
//! - `validate-config` checks a controller configuration file
//! - `key` splits a reconciliation key into namespace and name
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `info`).

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

mod cli;
mod commands;
mod snapshot;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Sync {
            snapshot,
            config,
            timeout_secs,
            format,
        } => {
            commands::sync(
                &snapshot,
                config.as_deref(),
                Duration::from_secs(timeout_secs),
                format,
            )
            .await
        }
        Commands::ValidateConfig { config } => commands::validate_config(&config),
        Commands::Key { parse } => commands::parse_key(&parse),
    }
}

/// Initialize tracing.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
