//! Configuration data structures for the resilience core.
//!
//! This module defines the schema for every tunable of the breaker registry,
//! the cache key generator, the cached-operation orchestrator, the embedding
//! cache and the hybrid storage gateway. Each section converts into the
//! runtime config type consumed by its component.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::cache::{KeyVersions, OrchestratorConfig};
use crate::embeddings::EmbeddingConfig;
use crate::resilience::CircuitBreakerConfig;
use crate::storage::GatewayConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// The root configuration object for the application.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Logging and observability settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Default thresholds for every circuit breaker.
    #[serde(default)]
    pub breaker: BreakerSettings,

    /// Version strings and namespace used to build cache keys.
    #[serde(default)]
    pub keys: KeySettings,

    /// Cached operation settings (providers, TTLs, size caps).
    #[serde(default)]
    pub cache: CacheSettings,

    /// Embedding cache bounds and sweep cadence.
    #[serde(default)]
    pub embeddings: EmbeddingSettings,

    /// Primary/fallback storage routing.
    #[serde(default)]
    pub storage: StorageSettings,
}

/// Settings for application logging and output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    /// Default: `info`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format for logs (`pretty`, `json`, `compact`).
    /// Default: `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Whether to mask API keys and bearer tokens in provider error text.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub redact_secrets: bool,
}

/// Circuit breaker thresholds shared by every named dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures that open a closed circuit.
    /// Default: `5`
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Milliseconds an open circuit waits after its last failure before probing.
    /// Default: `60000`
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,

    /// Consecutive half-open successes required to close the circuit.
    /// Default: `3`
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,

    /// Seconds without activity after which the registry drops a breaker.
    /// Default: `300`
    #[serde(default = "default_idle_reset_timeout_secs")]
    pub idle_reset_timeout_secs: u64,

    /// Seconds between idle cleanup sweeps of the registry.
    /// Default: `300`
    #[serde(default = "default_idle_reset_timeout_secs")]
    pub cleanup_interval_secs: u64,
}

/// Cache key namespace and invalidation versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySettings {
    /// Readable prefix of every cache key.
    /// Default: `analysis`
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_version")]
    pub scoring_version: String,

    /// Bumping this invalidates every cached inference result.
    #[serde(default = "default_version")]
    pub prompt_version: String,

    #[serde(default = "default_version")]
    pub normalization_version: String,

    /// Tenant used when a request carries none.
    /// Default: `global`
    #[serde(default = "default_tenant")]
    pub default_tenant: String,
}

/// Settings for the cached operation orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Provider whose key is checked first and whose name appears in lock keys.
    /// Default: `openai`
    #[serde(default = "default_primary_provider")]
    pub primary_provider: String,

    /// All providers in fixed priority order.
    /// Default: `["openai", "anthropic", "gemini"]`
    #[serde(default = "default_providers")]
    pub providers: Vec<String>,

    /// Serve entries computed by another provider for identical inputs.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub cross_provider_fallback: bool,

    /// Default: `86400` (24 hours)
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Results whose serialized form exceeds this are never cached.
    /// Default: `262144` (256KB)
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: usize,

    /// Default: `60`
    #[serde(default = "default_inflight_ttl_secs")]
    pub inflight_ttl_secs: u64,

    /// How often a caller that lost the in-flight race re-checks the cache.
    /// Default: `100`
    #[serde(default = "default_inflight_wait_ms")]
    pub inflight_wait_ms: u64,

    /// Tier recorded on entries when the request carries none.
    /// Default: `standard`
    #[serde(default = "default_tier")]
    pub default_tier: String,

    /// Per-operation TTL overrides in seconds.
    #[serde(default)]
    pub operation_ttls: HashMap<String, u64>,
}

/// Embedding cache bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// Default: `1000`
    #[serde(default = "default_max_embeddings")]
    pub max_entries: usize,

    /// Entries untouched for longer than this are swept.
    /// Default: `3600`
    #[serde(default = "default_embedding_max_age_secs")]
    pub max_age_secs: u64,

    /// Default: `300`
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Default: `60`
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    /// Process memory above which an insert first evicts half the cache.
    /// Default: `500`
    #[serde(default = "default_pre_insert_limit_mb")]
    pub pre_insert_limit_mb: u64,

    /// Process memory above which the monitor evicts 75% of the cache.
    /// Default: `600`
    #[serde(default = "default_emergency_limit_mb")]
    pub emergency_limit_mb: u64,
}

/// Primary/fallback storage routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Consecutive primary failures that mark the primary unavailable.
    /// Default: `3`
    #[serde(default = "default_storage_failure_threshold")]
    pub failure_threshold: u32,

    /// Default: `30`
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// First delay of the out-of-band probe's backoff.
    /// Default: `500`
    #[serde(default = "default_probe_initial_backoff_ms")]
    pub probe_initial_backoff_ms: u64,

    /// The out-of-band probe gives up after this long; the periodic probe takes over.
    /// Default: `30`
    #[serde(default = "default_probe_max_elapsed_secs")]
    pub probe_max_elapsed_secs: u64,
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
            half_open_max_calls: self.half_open_max_calls,
            reset_timeout: Duration::from_secs(self.idle_reset_timeout_secs),
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl KeySettings {
    pub fn to_versions(&self) -> KeyVersions {
        KeyVersions {
            scoring: self.scoring_version.clone(),
            prompt: self.prompt_version.clone(),
            normalization: self.normalization_version.clone(),
        }
    }
}

impl CacheSettings {
    pub fn to_orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            primary_provider: self.primary_provider.clone(),
            providers: self.providers.clone(),
            cross_provider_fallback: self.cross_provider_fallback,
            default_ttl: Duration::from_secs(self.default_ttl_secs),
            operation_ttls: self
                .operation_ttls
                .iter()
                .map(|(op, secs)| (op.clone(), Duration::from_secs(*secs)))
                .collect(),
            max_entry_bytes: self.max_entry_bytes,
            inflight_ttl: Duration::from_secs(self.inflight_ttl_secs),
            inflight_wait: Duration::from_millis(self.inflight_wait_ms),
            default_tier: self.default_tier.clone(),
        }
    }
}

impl EmbeddingSettings {
    pub fn to_embedding_config(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            max_entries: self.max_entries,
            max_age: Duration::from_secs(self.max_age_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            monitor_interval: Duration::from_secs(self.monitor_interval_secs),
            pre_insert_limit_bytes: self.pre_insert_limit_mb * MIB,
            emergency_limit_bytes: self.emergency_limit_mb * MIB,
            ..EmbeddingConfig::default()
        }
    }
}

impl StorageSettings {
    pub fn to_gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            failure_threshold: self.failure_threshold,
            probe_interval: Duration::from_secs(self.probe_interval_secs),
            probe_initial_backoff: Duration::from_millis(self.probe_initial_backoff_ms),
            probe_max_elapsed: Duration::from_secs(self.probe_max_elapsed_secs),
        }
    }
}

// Default trait implementations linking to custom logic

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            redact_secrets: true,
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            half_open_max_calls: default_half_open_max_calls(),
            idle_reset_timeout_secs: default_idle_reset_timeout_secs(),
            cleanup_interval_secs: default_idle_reset_timeout_secs(),
        }
    }
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            scoring_version: default_version(),
            prompt_version: default_version(),
            normalization_version: default_version(),
            default_tenant: default_tenant(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            primary_provider: default_primary_provider(),
            providers: default_providers(),
            cross_provider_fallback: true,
            default_ttl_secs: default_ttl_secs(),
            max_entry_bytes: default_max_entry_bytes(),
            inflight_ttl_secs: default_inflight_ttl_secs(),
            inflight_wait_ms: default_inflight_wait_ms(),
            default_tier: default_tier(),
            operation_ttls: HashMap::new(),
        }
    }
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            max_entries: default_max_embeddings(),
            max_age_secs: default_embedding_max_age_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            monitor_interval_secs: default_monitor_interval_secs(),
            pre_insert_limit_mb: default_pre_insert_limit_mb(),
            emergency_limit_mb: default_emergency_limit_mb(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_storage_failure_threshold(),
            probe_interval_secs: default_probe_interval_secs(),
            probe_initial_backoff_ms: default_probe_initial_backoff_ms(),
            probe_max_elapsed_secs: default_probe_max_elapsed_secs(),
        }
    }
}

// Helper functions for serde defaults and shared constants
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_true() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_ms() -> u64 {
    60_000
}

fn default_half_open_max_calls() -> u32 {
    3
}

fn default_idle_reset_timeout_secs() -> u64 {
    300 // 5 minutes
}

fn default_namespace() -> String {
    "analysis".to_string()
}

fn default_version() -> String {
    "v1".to_string()
}

fn default_tenant() -> String {
    "global".to_string()
}

fn default_primary_provider() -> String {
    "openai".to_string()
}

fn default_providers() -> Vec<String> {
    vec![
        "openai".to_string(),
        "anthropic".to_string(),
        "gemini".to_string(),
    ]
}

fn default_ttl_secs() -> u64 {
    86_400 // 24 hours
}

fn default_max_entry_bytes() -> usize {
    256 * 1024
}

fn default_inflight_ttl_secs() -> u64 {
    60
}

fn default_inflight_wait_ms() -> u64 {
    100
}

fn default_tier() -> String {
    "standard".to_string()
}

fn default_max_embeddings() -> usize {
    1000
}

fn default_embedding_max_age_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_monitor_interval_secs() -> u64 {
    60
}

fn default_pre_insert_limit_mb() -> u64 {
    500
}

fn default_emergency_limit_mb() -> u64 {
    600
}

fn default_storage_failure_threshold() -> u32 {
    3
}

fn default_probe_interval_secs() -> u64 {
    30
}

fn default_probe_initial_backoff_ms() -> u64 {
    500
}

fn default_probe_max_elapsed_secs() -> u64 {
    30
}
