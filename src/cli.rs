//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// polsync - one-way sync of origin policy into RBAC
#[derive(Parser, Debug)]
#[command(name = "polsync")]
#[command(version)]
#[command(about = "Sync origin policies, cluster policies and policy bindings into RBAC objects")]
#[command(
    long_about = "polsync watches origin authorization containers and keeps the matching RBAC roles, cluster roles and role bindings converged, recreating derived objects whose updates are rejected."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every controller over a snapshot and print the converged RBAC objects
    Sync {
        /// YAML snapshot of source containers and existing RBAC objects
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Controller configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Give up if the controllers have not settled after this many seconds
        #[arg(
            long,
            default_value_t = 30,
            value_parser = clap::value_parser!(u64).range(1..=MAX_TIMEOUT_SECS)
        )]
        timeout_secs: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
    },

    /// Parse and validate a controller configuration
    ValidateConfig {
        /// Controller configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Inspect reconciliation keys
    Key {
        /// Split a key into namespace and name
        #[arg(long)]
        parse: String,
    },
}

/// Upper bound for `sync --timeout-secs`: one day.
const MAX_TIMEOUT_SECS: u64 = 86_400;

/// How `sync` prints the derived stores.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Yaml,
}
