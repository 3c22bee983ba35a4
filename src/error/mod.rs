// Error types for the resilience core
// Author: kelexine (https://github.com/kelexine)

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResilienceError {
    #[error("{dependency} unavailable, retry in {}s", retry_in.as_secs())]
    DependencyUnavailable { dependency: String, retry_in: Duration },

    #[error("Rate limited by {provider}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Compute failed on {provider}: {message}")]
    ComputeFailed { provider: String, message: String },

    #[error("All providers failed for {operation} (tried: {}): {last}", attempts.join(", "))]
    ProvidersExhausted {
        operation: String,
        attempts: Vec<String>,
        last: Box<ResilienceError>,
    },

    #[error("Cache backend error: {0}")]
    CacheBackend(String),

    #[error("Result of {bytes} bytes exceeds cacheable limit of {limit} bytes")]
    OversizedResult { bytes: usize, limit: usize },

    #[error("Replay of {command} failed: {message}")]
    Replay { command: String, message: String },

    #[error("Storage backend {backend} failed: {message}")]
    Storage { backend: String, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config parsing error: {0}")]
    ConfigParsing(#[from] config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResilienceError {
    /// Stable label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ResilienceError::DependencyUnavailable { .. } => "dependency_unavailable",
            ResilienceError::RateLimited { .. } => "rate_limited",
            ResilienceError::ComputeFailed { .. } => "compute_failed",
            ResilienceError::ProvidersExhausted { .. } => "providers_exhausted",
            ResilienceError::CacheBackend(_) => "cache_backend",
            ResilienceError::OversizedResult { .. } => "oversized_result",
            ResilienceError::Replay { .. } => "replay",
            ResilienceError::Storage { .. } => "storage",
            ResilienceError::InvalidInput(_) => "invalid_input",
            ResilienceError::Config(_) | ResilienceError::ConfigParsing(_) => "configuration",
            ResilienceError::Json(_) => "json",
            ResilienceError::Io(_) => "io",
            ResilienceError::Internal(_) => "internal",
        }
    }

    /// True when the failure (or the last failure of an exhausted chain) was a rate limit.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ResilienceError::RateLimited { .. } => true,
            ResilienceError::ProvidersExhausted { last, .. } => last.is_rate_limited(),
            _ => false,
        }
    }

    /// Suggested wait before the caller tries again, if the failure carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ResilienceError::DependencyUnavailable { retry_in, .. } => Some(*retry_in),
            ResilienceError::RateLimited { retry_after, .. } => *retry_after,
            ResilienceError::ProvidersExhausted { last, .. } => last.retry_after(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ResilienceError>;
