// resilience-core - Circuit breakers, deduplicating result cache and hybrid storage
// Author: kelexine (https://github.com/kelexine)

use anyhow::{Context, Result};
use clap::Parser;
use resilience_core::cache::{canonicalize, CacheKeyGenerator, CacheKeyInput};
use resilience_core::cli::{Args, Command};
use resilience_core::config::AppConfig;
use resilience_core::metrics::gather_metrics;
use resilience_core::utils::logging;
use resilience_core::ResilienceContext;
use serde_json::Value;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Phase 1: Load configuration
    let config = match &args.config {
        Some(path) => AppConfig::load_from(path, true)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => AppConfig::load()?,
    };

    // Phase 2: Initialize logging
    logging::init(&config.logging)?;
    debug!("resilience-core v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Command::Key {
            operation,
            provider,
            tenant,
            payload,
        } => {
            let payload = parse_payload(&payload)?;
            let keys = CacheKeyGenerator::new(&config.keys.namespace, config.keys.to_versions())
                .with_default_tenant(&config.keys.default_tenant);
            let input = CacheKeyInput {
                operation: &operation,
                payload: &payload,
                tenant: tenant.as_deref(),
            };
            let key = keys.generate(&input, &provider);

            println!("canonical: {}", canonicalize(&payload));
            println!("key:       {}", key);
            println!("inflight:  {}", keys.inflight_key(&key));
        }
        Command::Canonicalize { payload } => {
            let payload = parse_payload(&payload)?;
            println!("{}", canonicalize(&payload));
        }
        Command::Metrics => {
            let context = ResilienceContext::builder(config).build()?;
            // Register a breaker per configured provider so their gauges are exported
            for provider in &context.config().cache.providers {
                context.breakers().get_breaker(provider, None);
            }
            print!("{}", gather_metrics());
        }
    }

    Ok(())
}

fn parse_payload(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).context("--payload is not valid JSON")
}
