//! Structured logging and secret redaction utilities.
//!
//! This module configures the `tracing` ecosystem for the application,
//! supporting multiple output formats and providing a helper that keeps
//! provider credentials out of logs and error messages.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::config::LoggingConfig;
use crate::error::{ResilienceError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global tracing subscriber for the application.
///
/// Supports three output formats:
/// - `json`: Structured JSON logs for production ingestion.
/// - `compact`: Single-line human-readable output.
/// - `pretty` (default): Multi-line, colorized output for development.
///
/// Output goes to stderr so the operator binary's stdout stays parseable.
/// Log levels are controlled via the `RUST_LOG` environment variable or
/// the provided `LoggingConfig`.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let installed = match config.format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        "compact" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
    };

    installed.map_err(|e| ResilienceError::Config(format!("Failed to install logger: {}", e)))
}

static SECRET_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"sk-[A-Za-z0-9_\-]{8,}", "[REDACTED_API_KEY]"),
        (r"(?i)bearer\s+[A-Za-z0-9._\-]+", "Bearer [REDACTED_TOKEN]"),
        (r"(?i)(api[_-]?key=)[^&\s]+", "${1}[REDACTED]"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Masks API keys, bearer tokens and `api_key=` parameters.
///
/// Provider error bodies sometimes echo request headers; everything that
/// ends up in a log line or a `ResilienceError` passes through here first.
pub fn redact_secrets(input: &str) -> String {
    SECRET_PATTERNS
        .iter()
        .fold(input.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}
