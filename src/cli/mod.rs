// CLI module for resilience-core
// Author: kelexine (https://github.com/kelexine)

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// resilience-core - inspect configuration, cache keys and metrics
#[derive(Parser, Debug)]
#[command(name = "resilience-core", version, about, long_about = None)]
pub struct Args {
    /// Config file (default: ~/.resilience-core/config.toml)
    #[arg(long, global = true, env = "RESILIENCE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Print the effective, validated configuration as TOML
    Config,

    /// Print the cache key and in-flight lock key for a payload
    Key {
        /// Operation type, e.g. `match`
        #[arg(long)]
        operation: String,

        #[arg(long)]
        provider: String,

        /// Defaults to keys.default_tenant
        #[arg(long)]
        tenant: Option<String>,

        /// JSON payload
        #[arg(long)]
        payload: String,
    },

    /// Print the canonical form of a JSON payload
    Canonicalize {
        #[arg(long)]
        payload: String,
    },

    /// Print the prometheus exposition of a freshly built context
    Metrics,
}
