// Metrics module for Prometheus observability
// Author: kelexine (https://github.com/kelexine)

mod registry;

pub use registry::{
    gather_metrics, BREAKER_CALLS, BREAKER_STATE, CACHE_BACKEND_ERRORS, CACHE_ENTRY_AGE,
    CACHE_LATENCY, CACHE_LOOKUPS, CACHE_WRITES, EMBEDDING_ENTRIES, EMBEDDING_OPERATIONS,
    REPLAY_OPERATIONS, REPLAY_QUEUE_DEPTH, STORAGE_AVAILABLE, STORAGE_OPERATIONS,
};

use crate::cache::{CacheStatus, OperationTimings};
use crate::resilience::CircuitState;
use std::time::Duration;

/// One finished cached-operation call.
#[derive(Debug, Clone, Copy)]
pub struct OperationSample<'a> {
    pub operation: &'a str,
    pub status: CacheStatus,
    pub provider: &'a str,
    pub timings: OperationTimings,
    pub age: Option<Duration>,
    pub succeeded: bool,
}

/// Receiver of cached-operation timings and hit/miss counts.
///
/// Fire-and-forget: implementations must not block or fail the caller.
pub trait MetricsSink: Send + Sync {
    fn record_operation(&self, sample: &OperationSample<'_>);
}

/// Sink writing to the global Prometheus registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusSink;

impl MetricsSink for PrometheusSink {
    fn record_operation(&self, sample: &OperationSample<'_>) {
        let outcome = if sample.succeeded { "ok" } else { "error" };
        CACHE_LOOKUPS
            .with_label_values(&[
                sample.operation,
                sample.status.as_str(),
                sample.provider,
                outcome,
            ])
            .inc();

        CACHE_LATENCY
            .with_label_values(&[sample.operation, "total"])
            .observe(sample.timings.total.as_secs_f64());
        CACHE_LATENCY
            .with_label_values(&[sample.operation, "provider"])
            .observe(sample.timings.provider.as_secs_f64());
        CACHE_LATENCY
            .with_label_values(&[sample.operation, "cache"])
            .observe(sample.timings.cache.as_secs_f64());

        if let Some(age) = sample.age {
            CACHE_ENTRY_AGE
                .with_label_values(&[sample.operation])
                .observe(age.as_secs_f64());
        }
    }
}

/// Helper to record cache write outcomes
pub fn record_cache_write(operation: &str, outcome: &str) {
    CACHE_WRITES.with_label_values(&[operation, outcome]).inc();
}

pub fn record_cache_backend_error(op: &str) {
    CACHE_BACKEND_ERRORS.with_label_values(&[op]).inc();
}

/// Helper to record circuit breaker metrics
pub fn record_breaker_state(name: &str, state: CircuitState) {
    BREAKER_STATE.with_label_values(&[name]).set(state.as_gauge());
}

pub fn record_breaker_call(name: &str, outcome: &str) {
    BREAKER_CALLS.with_label_values(&[name, outcome]).inc();
}

/// Helper to record embedding cache operations (LRU in-memory cache)
pub fn record_embedding_operation(operation: &str, count: u64) {
    if count > 0 {
        EMBEDDING_OPERATIONS
            .with_label_values(&[operation])
            .inc_by(count as f64);
    }
}

pub fn update_embedding_entries(count: usize) {
    EMBEDDING_ENTRIES
        .with_label_values(&["active"])
        .set(count as f64);
}

/// Helper to record storage routing
pub fn record_storage_operation(backend: &str, command: &str, outcome: &str) {
    STORAGE_OPERATIONS
        .with_label_values(&[backend, command, outcome])
        .inc();
}

pub fn update_storage_availability(backend: &str, available: bool) {
    STORAGE_AVAILABLE
        .with_label_values(&[backend])
        .set(if available { 1.0 } else { 0.0 });
}

pub fn record_replay(outcome: &str) {
    REPLAY_OPERATIONS.with_label_values(&[outcome]).inc();
}

pub fn update_replay_queue_depth(backend: &str, depth: usize) {
    REPLAY_QUEUE_DEPTH
        .with_label_values(&[backend])
        .set(depth as f64);
}
