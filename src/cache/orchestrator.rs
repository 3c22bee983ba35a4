// Cached operation orchestrator - lookup, cross-provider fallback, in-flight dedup, compute, store
// Author: kelexine (https://github.com/kelexine)

use super::backend::KeyValueCache;
use super::keys::{CacheKeyGenerator, CacheKeyInput};
use super::models::{
    CacheEntry, CacheStats, CacheStatus, CachedOutcome, Computed, OperationRequest,
    OperationTimings, OrchestratorConfig,
};
use crate::error::{ResilienceError, Result};
use crate::metrics::{MetricsSink, OperationSample, PrometheusSink};
use crate::providers::ProviderChain;
use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

enum Lookup<T> {
    Found(T),
    Missing,
    /// The backend failed; the rest of the call runs without the cache.
    Unavailable,
}

enum LockWait<T> {
    Acquired,
    /// Another caller's result showed up while waiting.
    Served(CacheEntry<T>, CacheStatus),
    /// Gave up waiting on a lock that outlived its TTL.
    ComputeAnyway,
    Offline,
}

/// Wraps expensive provider calls with a shared result cache.
///
/// The cache is only ever a performance optimization: any backend failure
/// turns the call into a plain compute.
pub struct CachedOperationOrchestrator {
    cache: Arc<dyn KeyValueCache>,
    keys: CacheKeyGenerator,
    config: OrchestratorConfig,
    metrics: Arc<dyn MetricsSink>,
    stats: Mutex<CacheStats>,
}

impl CachedOperationOrchestrator {
    pub fn new(
        cache: Arc<dyn KeyValueCache>,
        keys: CacheKeyGenerator,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            cache,
            keys,
            config,
            metrics: Arc::new(PrometheusSink),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    pub fn with_metrics_sink(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn keys(&self) -> &CacheKeyGenerator {
        &self.keys
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    /// Serve `request` from cache, or run `compute` and cache its result.
    ///
    /// Steps: primary-provider lookup, cross-provider lookup, in-flight lock
    /// (losers poll until the holder stores or lets go), compute, size-capped
    /// store, lock release. Compute failures are returned as-is and never cached.
    pub async fn run<T, F, Fut>(
        &self,
        request: &OperationRequest,
        compute: F,
    ) -> Result<CachedOutcome<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Computed<T>>>,
    {
        let started = Instant::now();
        let mut cache_time = Duration::ZERO;
        let input = CacheKeyInput {
            operation: &request.operation,
            payload: &request.payload,
            tenant: request.tenant.as_deref(),
        };
        let primary_key = self.keys.generate(&input, &self.config.primary_provider);

        let mut cache_online = true;
        match self.find_cached::<T>(&input, &primary_key, &mut cache_time).await {
            Lookup::Found((entry, status)) => {
                let outcome = self.finish_hit(request, entry, status, false, started, cache_time);
                return Ok(outcome);
            }
            Lookup::Missing => {}
            Lookup::Unavailable => cache_online = false,
        }

        let lock_key = self.keys.inflight_key(&primary_key);
        let token = Uuid::new_v4().to_string();
        let mut lock_held = false;

        if cache_online {
            let waited = self
                .acquire_or_wait::<T>(
                    request,
                    &input,
                    &primary_key,
                    &lock_key,
                    &token,
                    &mut cache_time,
                )
                .await;
            match waited {
                LockWait::Acquired => lock_held = true,
                LockWait::Served(entry, status) => {
                    let outcome =
                        self.finish_hit(request, entry, status, true, started, cache_time);
                    return Ok(outcome);
                }
                LockWait::ComputeAnyway => {}
                LockWait::Offline => cache_online = false,
            }
        }

        let provider_start = Instant::now();
        let computed = compute().await;
        let provider_time = provider_start.elapsed();

        let outcome = match computed {
            Ok(Computed { provider, value }) => {
                if cache_online {
                    self.store(request, &input, &provider, &value, &mut cache_time)
                        .await;
                }
                self.stats.lock().misses += 1;
                let timings = OperationTimings {
                    total: started.elapsed(),
                    provider: provider_time,
                    cache: cache_time,
                };
                self.metrics.record_operation(&OperationSample {
                    operation: &request.operation,
                    status: CacheStatus::Miss,
                    provider: &provider,
                    timings,
                    age: None,
                    succeeded: true,
                });
                Ok(CachedOutcome {
                    value,
                    status: CacheStatus::Miss,
                    provider,
                    age: None,
                    deduplicated: false,
                    timings,
                })
            }
            Err(e) => {
                self.stats.lock().compute_failures += 1;
                warn!(
                    operation = %request.operation,
                    error_kind = e.kind(),
                    "Cached operation compute failed: {}",
                    e
                );
                self.metrics.record_operation(&OperationSample {
                    operation: &request.operation,
                    status: CacheStatus::Miss,
                    provider: &self.config.primary_provider,
                    timings: OperationTimings {
                        total: started.elapsed(),
                        provider: provider_time,
                        cache: cache_time,
                    },
                    age: None,
                    succeeded: false,
                });
                Err(e)
            }
        };

        // Released on every path once compute has returned
        if lock_held {
            self.release_lock(&lock_key, &token).await;
        }

        outcome
    }

    /// Take the in-flight lock, or wait for its holder to publish a result.
    ///
    /// While another caller holds the lock this re-checks the cache every
    /// `inflight_wait`. A lock that disappears without a stored entry (the
    /// holder failed or skipped the write) is taken over. Waiting stops after
    /// `inflight_ttl`, when the holder's lock would have expired anyway.
    async fn acquire_or_wait<T: DeserializeOwned>(
        &self,
        request: &OperationRequest,
        input: &CacheKeyInput<'_>,
        primary_key: &str,
        lock_key: &str,
        token: &str,
        cache_time: &mut Duration,
    ) -> LockWait<T> {
        let deadline = Instant::now() + self.config.inflight_ttl;
        let mut waited = false;

        loop {
            let t = Instant::now();
            let acquired = self
                .cache
                .set_if_absent(lock_key, token.to_string(), self.config.inflight_ttl)
                .await;
            *cache_time += t.elapsed();

            match acquired {
                Ok(true) => return LockWait::Acquired,
                Ok(false) => {}
                Err(e) => {
                    self.note_backend_error("acquire_lock", &e);
                    return LockWait::Offline;
                }
            }

            if Instant::now() >= deadline {
                warn!(
                    operation = %request.operation,
                    lock = %lock_key,
                    "In-flight computation outlived its lock TTL, computing anyway"
                );
                return LockWait::ComputeAnyway;
            }
            if !waited {
                debug!(
                    operation = %request.operation,
                    lock = %lock_key,
                    "Identical computation in flight, waiting for its result"
                );
                waited = true;
            }

            tokio::time::sleep(self.config.inflight_wait).await;
            match self.find_cached::<T>(input, primary_key, cache_time).await {
                Lookup::Found((entry, status)) => return LockWait::Served(entry, status),
                Lookup::Missing => {}
                Lookup::Unavailable => return LockWait::Offline,
            }
        }
    }

    /// Run `request` through the provider chain as the compute step.
    pub async fn run_with_providers(
        &self,
        request: &OperationRequest,
        chain: &ProviderChain,
    ) -> Result<CachedOutcome<Value>> {
        self.run(request, || chain.invoke(&request.operation, &request.payload))
            .await
    }

    /// Delete cached entries of `operation`, optionally only those of one provider.
    /// Returns the number of keys removed.
    pub async fn purge(&self, operation: &str, provider: Option<&str>) -> Result<usize> {
        let prefix = match provider {
            Some(provider) => self.keys.provider_prefix(operation, provider),
            None => self.keys.operation_prefix(operation),
        };
        let keys = self.cache.scan_prefix(&prefix).await?;
        let mut removed = 0;
        for key in &keys {
            if self.cache.delete(key).await? {
                removed += 1;
            }
        }
        debug!(operation, prefix = %prefix, removed, "Purged cached entries");
        Ok(removed)
    }

    /// Primary key first, then (if enabled) each other provider in priority order.
    async fn find_cached<T: DeserializeOwned>(
        &self,
        input: &CacheKeyInput<'_>,
        primary_key: &str,
        cache_time: &mut Duration,
    ) -> Lookup<(CacheEntry<T>, CacheStatus)> {
        match self.lookup::<T>(primary_key, cache_time).await {
            Lookup::Found(entry) => return Lookup::Found((entry, CacheStatus::Hit)),
            Lookup::Unavailable => return Lookup::Unavailable,
            Lookup::Missing => {}
        }

        if !self.config.cross_provider_fallback {
            return Lookup::Missing;
        }

        for provider in self.config.fallback_providers() {
            let key = self.keys.generate(input, provider);
            match self.lookup::<T>(&key, cache_time).await {
                Lookup::Found(entry) => {
                    return Lookup::Found((entry, CacheStatus::FallbackHit));
                }
                Lookup::Unavailable => return Lookup::Unavailable,
                Lookup::Missing => {}
            }
        }

        Lookup::Missing
    }

    async fn lookup<T: DeserializeOwned>(
        &self,
        key: &str,
        cache_time: &mut Duration,
    ) -> Lookup<CacheEntry<T>> {
        let t = Instant::now();
        let raw = self.cache.get(key).await;
        *cache_time += t.elapsed();

        match raw {
            Ok(Some(raw)) => match serde_json::from_str::<CacheEntry<T>>(&raw) {
                Ok(entry) => Lookup::Found(entry),
                Err(e) => {
                    warn!(key = %key, "Discarding undecodable cache entry: {}", e);
                    Lookup::Missing
                }
            },
            Ok(None) => Lookup::Missing,
            Err(e) => {
                self.note_backend_error("get", &e);
                Lookup::Unavailable
            }
        }
    }

    async fn store<T: Serialize>(
        &self,
        request: &OperationRequest,
        input: &CacheKeyInput<'_>,
        provider: &str,
        value: &T,
        cache_time: &mut Duration,
    ) {
        let content_bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes.len(),
            Err(e) => {
                warn!(
                    operation = %request.operation,
                    "Result is not serializable, skipping cache: {}",
                    e
                );
                return;
            }
        };

        if content_bytes > self.config.max_entry_bytes {
            let err = ResilienceError::OversizedResult {
                bytes: content_bytes,
                limit: self.config.max_entry_bytes,
            };
            warn!(operation = %request.operation, provider, "Skipping cache write: {}", err);
            self.stats.lock().oversized += 1;
            crate::metrics::record_cache_write(&request.operation, "oversized");
            return;
        }

        let entry = CacheEntry {
            data: value,
            cached_at: Utc::now(),
            provider: provider.to_string(),
            prompt_version: self.keys.versions().prompt.clone(),
            content_bytes,
            tier: request
                .tier
                .clone()
                .unwrap_or_else(|| self.config.default_tier.clone()),
        };
        let serialized = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!(operation = %request.operation, "Failed to encode cache entry: {}", e);
                return;
            }
        };

        let key = self.keys.generate(input, provider);
        let ttl = self.config.ttl_for(&request.operation);
        let t = Instant::now();
        let stored = self.cache.set(&key, serialized, ttl).await;
        *cache_time += t.elapsed();

        match stored {
            Ok(()) => {
                debug!(operation = %request.operation, provider, content_bytes, "Cached result");
                self.stats.lock().stores += 1;
                crate::metrics::record_cache_write(&request.operation, "stored");
            }
            Err(e) => {
                self.note_backend_error("set", &e);
                crate::metrics::record_cache_write(&request.operation, "failed");
            }
        }
    }

    async fn release_lock(&self, lock_key: &str, token: &str) {
        // Only the owner may release; an expired-and-retaken lock belongs to someone else
        match self.cache.delete_if_equals(lock_key, token).await {
            Ok(true) => {}
            Ok(false) => debug!(lock = %lock_key, "In-flight lock already expired or taken over"),
            Err(e) => self.note_backend_error("release_lock", &e),
        }
    }

    fn finish_hit<T>(
        &self,
        request: &OperationRequest,
        entry: CacheEntry<T>,
        status: CacheStatus,
        deduplicated: bool,
        started: Instant,
        cache_time: Duration,
    ) -> CachedOutcome<T> {
        let age = entry.age();
        let timings = OperationTimings {
            total: started.elapsed(),
            provider: Duration::ZERO,
            cache: cache_time,
        };

        {
            let mut stats = self.stats.lock();
            match status {
                CacheStatus::Hit => stats.hits += 1,
                CacheStatus::FallbackHit => stats.fallback_hits += 1,
                CacheStatus::Miss => stats.misses += 1,
            }
            if deduplicated {
                stats.deduplicated += 1;
            }
        }

        debug!(
            operation = %request.operation,
            status = status.as_str(),
            provider = %entry.provider,
            age_secs = age.as_secs(),
            deduplicated,
            "Served from cache"
        );
        self.metrics.record_operation(&OperationSample {
            operation: &request.operation,
            status,
            provider: &entry.provider,
            timings,
            age: Some(age),
            succeeded: true,
        });

        CachedOutcome {
            value: entry.data,
            status,
            provider: entry.provider,
            age: Some(age),
            deduplicated,
            timings,
        }
    }

    fn note_backend_error(&self, op: &str, err: &ResilienceError) {
        warn!(cache_op = op, "Cache backend failure, treating as miss: {}", err);
        self.stats.lock().backend_errors += 1;
        crate::metrics::record_cache_backend_error(op);
    }
}
