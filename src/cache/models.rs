//! Cache entry, configuration and outcome models.

// Author: kelexine (https://github.com/kelexine)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// A cached computation result plus the metadata needed to report on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
    /// Provider that produced `data`.
    pub provider: String,
    pub prompt_version: String,
    /// Serialized size of `data`; never above the configured cap.
    pub content_bytes: usize,
    pub tier: String,
}

impl<T> CacheEntry<T> {
    pub fn age(&self) -> Duration {
        (Utc::now() - self.cached_at).to_std().unwrap_or_default()
    }
}

/// How a cached operation was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheStatus {
    /// Found under the primary provider's key.
    Hit,
    /// Found under another provider's key for the same inputs.
    FallbackHit,
    /// Computed by this call.
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::FallbackHit => "fallback_hit",
            CacheStatus::Miss => "miss",
        }
    }
}

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub primary_provider: String,
    /// Every provider in fixed priority order, primary included.
    pub providers: Vec<String>,
    pub cross_provider_fallback: bool,
    pub default_ttl: Duration,
    pub operation_ttls: HashMap<String, Duration>,
    pub max_entry_bytes: usize,
    pub inflight_ttl: Duration,
    /// Poll interval while another caller holds the in-flight lock.
    pub inflight_wait: Duration,
    pub default_tier: String,
}

impl OrchestratorConfig {
    pub fn ttl_for(&self, operation: &str) -> Duration {
        self.operation_ttls
            .get(operation)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    /// Providers consulted after a primary miss, in priority order.
    pub fn fallback_providers(&self) -> impl Iterator<Item = &str> {
        self.providers
            .iter()
            .map(String::as_str)
            .filter(move |p| *p != self.primary_provider)
    }
}

impl Default for OrchestratorConfig {
    /// - 24h TTL, 256KB entry cap
    /// - 60s in-flight lock TTL, re-checked every 100ms while held
    fn default() -> Self {
        Self {
            primary_provider: "openai".to_string(),
            providers: vec![
                "openai".to_string(),
                "anthropic".to_string(),
                "gemini".to_string(),
            ],
            cross_provider_fallback: true,
            default_ttl: Duration::from_secs(24 * 60 * 60),
            operation_ttls: HashMap::new(),
            max_entry_bytes: 256 * 1024,
            inflight_ttl: Duration::from_secs(60),
            inflight_wait: Duration::from_millis(100),
            default_tier: "standard".to_string(),
        }
    }
}

/// One cached-operation request.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub operation: String,
    pub payload: Value,
    pub tenant: Option<String>,
    pub tier: Option<String>,
}

impl OperationRequest {
    pub fn new(operation: impl Into<String>, payload: Value) -> Self {
        Self {
            operation: operation.into(),
            payload,
            tenant: None,
            tier: None,
        }
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }
}

/// Value produced by the compute step, tagged with the provider that served it.
#[derive(Debug, Clone, PartialEq)]
pub struct Computed<T> {
    pub provider: String,
    pub value: T,
}

/// Where the time of one orchestrated call went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OperationTimings {
    pub total: Duration,
    /// Time spent in the compute step (zero on hits).
    pub provider: Duration,
    /// Time spent talking to the cache backend.
    pub cache: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedOutcome<T> {
    pub value: T,
    pub status: CacheStatus,
    /// Provider that produced the value.
    pub provider: String,
    /// Entry age for hits; `None` for fresh computations.
    pub age: Option<Duration>,
    /// True when the value was computed by a concurrent caller holding the in-flight lock.
    pub deduplicated: bool,
    pub timings: OperationTimings,
}

/// Statistics for cache operations.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub fallback_hits: u64,
    pub misses: u64,
    /// Hits obtained by the in-flight re-check.
    pub deduplicated: u64,
    pub stores: u64,
    pub oversized: u64,
    pub backend_errors: u64,
    pub compute_failures: u64,
}
