// Prometheus metrics registry and collectors
// Author: kelexine (https://github.com/kelexine)

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec_with_registry, register_gauge_vec_with_registry,
    register_histogram_vec_with_registry, CounterVec, Encoder, GaugeVec, HistogramOpts,
    HistogramVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // CACHED OPERATION METRICS
    // ============================================================================

    /// Cached operation lookups by outcome
    pub static ref CACHE_LOOKUPS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("cache_lookups_total", "Cached operation calls by status"),
        &["operation", "status", "provider", "outcome"], // status: hit, fallback_hit, miss
        REGISTRY
    ).unwrap();

    /// Time breakdown of cached operation calls
    pub static ref CACHE_LATENCY: HistogramVec = register_histogram_vec_with_registry!(
        HistogramOpts::new("cache_operation_duration_seconds", "Cached operation duration by phase")
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["operation", "phase"], // phase: total, provider, cache
        REGISTRY
    ).unwrap();

    /// Age of entries served from cache
    pub static ref CACHE_ENTRY_AGE: HistogramVec = register_histogram_vec_with_registry!(
        HistogramOpts::new("cache_entry_age_seconds", "Age of cache entries at hit time")
            .buckets(vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 21600.0, 86400.0]),
        &["operation"],
        REGISTRY
    ).unwrap();

    /// Cache write attempts
    pub static ref CACHE_WRITES: CounterVec = register_counter_vec_with_registry!(
        Opts::new("cache_writes_total", "Cache writes by outcome"),
        &["operation", "outcome"], // outcome: stored, oversized, failed
        REGISTRY
    ).unwrap();

    /// Cache backend failures absorbed as misses
    pub static ref CACHE_BACKEND_ERRORS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("cache_backend_errors_total", "Cache backend failures"),
        &["op"],
        REGISTRY
    ).unwrap();

    // ============================================================================
    // CIRCUIT BREAKER METRICS
    // ============================================================================

    /// Current breaker state (0 closed, 1 open, 2 half-open)
    pub static ref BREAKER_STATE: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("circuit_breaker_state", "Circuit breaker state per dependency"),
        &["name"],
        REGISTRY
    ).unwrap();

    /// Calls through breakers
    pub static ref BREAKER_CALLS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("circuit_breaker_calls_total", "Calls through circuit breakers"),
        &["name", "outcome"], // outcome: success, failure, rejected
        REGISTRY
    ).unwrap();

    // ============================================================================
    // EMBEDDING CACHE METRICS
    // ============================================================================

    /// Embedding cache operations
    pub static ref EMBEDDING_OPERATIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("embedding_cache_operations_total", "Embedding cache operations"),
        &["operation"], // hit, miss, evict_capacity, evict_pressure, evict_emergency, evict_age
        REGISTRY
    ).unwrap();

    /// Current embedding cache entries
    pub static ref EMBEDDING_ENTRIES: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("embedding_cache_entries", "Current number of cached embeddings"),
        &["type"], // type: active
        REGISTRY
    ).unwrap();

    // ============================================================================
    // STORAGE METRICS
    // ============================================================================

    /// Storage commands by backend and outcome
    pub static ref STORAGE_OPERATIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("storage_operations_total", "Storage commands by backend"),
        &["backend", "command", "outcome"],
        REGISTRY
    ).unwrap();

    /// Primary storage availability (1 available, 0 unavailable)
    pub static ref STORAGE_AVAILABLE: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("storage_primary_available", "Primary storage availability"),
        &["backend"],
        REGISTRY
    ).unwrap();

    /// Replayed writes
    pub static ref REPLAY_OPERATIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("storage_replay_total", "Replayed writes by outcome"),
        &["outcome"], // outcome: replayed, failed
        REGISTRY
    ).unwrap();

    /// Writes waiting for replay
    pub static ref REPLAY_QUEUE_DEPTH: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("storage_replay_queue_depth", "Writes queued for replay"),
        &["backend"],
        REGISTRY
    ).unwrap();
}

/// Gather all metrics and return as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
