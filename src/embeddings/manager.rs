//! Bounded in-process cache of computed embedding vectors.
//!
//! Entries are keyed by the SHA-256 of the embedded text and kept in an
//! explicit LRU list. Four independent mechanisms bound the cache:
//!
//! - capacity: an insert at `max_entries` evicts the least-recently-used entry
//! - pre-insert pressure: above `pre_insert_limit_bytes` an insert first evicts half the entries
//! - age sweep: every `sweep_interval`, entries untouched for `max_age` are dropped
//! - memory monitor: every `monitor_interval`, above `emergency_limit_bytes` 75% are dropped
//!
//! Author: kelexine (<https://github.com/kelexine>)

use super::memory::MemoryProbe;
use crate::error::Result;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingConfig {
    pub max_entries: usize,
    pub max_age: Duration,
    pub sweep_interval: Duration,
    pub monitor_interval: Duration,
    pub pre_insert_limit_bytes: u64,
    pub emergency_limit_bytes: u64,
    /// Share of entries evicted by the pre-insert check.
    pub pressure_evict_ratio: f64,
    /// Share of entries evicted by the memory monitor.
    pub emergency_evict_ratio: f64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_age: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            monitor_interval: Duration::from_secs(60),
            pre_insert_limit_bytes: 500 * MIB,
            emergency_limit_bytes: 600 * MIB,
            pressure_evict_ratio: 0.5,
            emergency_evict_ratio: 0.75,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EmbeddingStats {
    pub hits: u64,
    pub misses: u64,
    pub capacity_evictions: u64,
    pub pressure_evictions: u64,
    pub emergency_evictions: u64,
    pub age_evictions: u64,
}

#[derive(Debug)]
struct EmbeddingEntry {
    vector: Arc<Vec<f32>>,
    last_access: Instant,
}

struct EmbeddingState {
    entries: LruCache<String, EmbeddingEntry>,
    stats: EmbeddingStats,
}

impl EmbeddingState {
    /// Evict `ratio` of the entries, least recently used first, rounding up.
    fn evict_fraction(&mut self, ratio: f64) -> usize {
        let count = (self.entries.len() as f64 * ratio).ceil() as usize;
        let mut evicted = 0;
        while evicted < count && self.entries.pop_lru().is_some() {
            evicted += 1;
        }
        evicted
    }
}

/// SHA-256 hex digest of `content`, the cache key of its embedding.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct EmbeddingManager {
    config: EmbeddingConfig,
    memory: Arc<dyn MemoryProbe>,
    state: Mutex<EmbeddingState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EmbeddingManager {
    pub fn new(config: EmbeddingConfig, memory: Arc<dyn MemoryProbe>) -> Self {
        Self {
            config,
            memory,
            state: Mutex::new(EmbeddingState {
                entries: LruCache::unbounded(),
                stats: EmbeddingStats::default(),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    /// Return the cached vector for `content`, or run `generate` and cache its output.
    ///
    /// The generator runs without holding the cache lock; two concurrent
    /// misses for the same text both generate and the later insert wins.
    pub async fn get_or_generate<F, Fut>(
        &self,
        content: &str,
        generate: F,
    ) -> Result<Arc<Vec<f32>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<f32>>>,
    {
        let key = content_hash(content);
        if let Some(vector) = self.get(&key) {
            return Ok(vector);
        }

        {
            let mut state = self.state.lock();
            state.stats.misses += 1;
        }
        crate::metrics::record_embedding_operation("miss", 1);

        let vector = generate().await?;
        Ok(self.insert(key, vector))
    }

    /// Look up by content hash. A hit refreshes the entry's access time and LRU position.
    pub fn get(&self, hash: &str) -> Option<Arc<Vec<f32>>> {
        let mut state = self.state.lock();
        let vector = state.entries.get_mut(hash).map(|entry| {
            entry.last_access = Instant::now();
            Arc::clone(&entry.vector)
        })?;
        state.stats.hits += 1;
        drop(state);

        crate::metrics::record_embedding_operation("hit", 1);
        Some(vector)
    }

    /// Insert a vector under `hash`, applying the pre-insert memory check and
    /// the capacity bound first.
    pub fn insert(&self, hash: String, vector: Vec<f32>) -> Arc<Vec<f32>> {
        let heap = self.memory.heap_bytes();
        let vector = Arc::new(vector);

        let mut state = self.state.lock();
        if heap > self.config.pre_insert_limit_bytes {
            let evicted = state.evict_fraction(self.config.pressure_evict_ratio);
            state.stats.pressure_evictions += evicted as u64;
            warn!(
                heap_mb = heap / MIB,
                evicted,
                "Memory above pre-insert limit, evicted embeddings"
            );
            crate::metrics::record_embedding_operation("evict_pressure", evicted as u64);
        }

        if !state.entries.contains(&hash) && state.entries.len() >= self.config.max_entries {
            if let Some((evicted_key, _)) = state.entries.pop_lru() {
                state.stats.capacity_evictions += 1;
                debug!(
                    evicted = %&evicted_key[..12.min(evicted_key.len())],
                    "Evicted least-recently-used embedding"
                );
                crate::metrics::record_embedding_operation("evict_capacity", 1);
            }
        }

        state.entries.put(
            hash,
            EmbeddingEntry {
                vector: Arc::clone(&vector),
                last_access: Instant::now(),
            },
        );
        crate::metrics::update_embedding_entries(state.entries.len());
        vector
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.state.lock().entries.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> EmbeddingStats {
        self.state.lock().stats.clone()
    }

    /// Drop entries whose last access is older than `max_age`. Returns the count removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| {
                now.saturating_duration_since(entry.last_access) > self.config.max_age
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.entries.pop(key);
        }
        state.stats.age_evictions += expired.len() as u64;
        let remaining = state.entries.len();
        drop(state);

        if !expired.is_empty() {
            info!(removed = expired.len(), remaining, "Swept stale embeddings");
            crate::metrics::record_embedding_operation("evict_age", expired.len() as u64);
            crate::metrics::update_embedding_entries(remaining);
        }
        expired.len()
    }

    /// Emergency eviction when process memory exceeds the warning threshold.
    /// Returns the count removed.
    pub fn check_memory_pressure(&self) -> usize {
        let heap = self.memory.heap_bytes();
        if heap <= self.config.emergency_limit_bytes {
            return 0;
        }

        let mut state = self.state.lock();
        let evicted = state.evict_fraction(self.config.emergency_evict_ratio);
        state.stats.emergency_evictions += evicted as u64;
        let remaining = state.entries.len();
        drop(state);

        warn!(
            heap_mb = heap / MIB,
            evicted,
            remaining,
            "Memory above emergency limit, evicted embeddings"
        );
        crate::metrics::record_embedding_operation("evict_emergency", evicted as u64);
        crate::metrics::update_embedding_entries(remaining);
        evicted
    }

    /// Spawn the age sweep and the memory monitor. Calling it twice restarts both.
    pub fn start(self: &Arc<Self>) {
        let sweeper = spawn_periodic(Arc::downgrade(self), self.config.sweep_interval, |m| {
            m.sweep_expired();
        });
        let monitor = spawn_periodic(Arc::downgrade(self), self.config.monitor_interval, |m| {
            m.check_memory_pressure();
        });

        let mut tasks = self.tasks.lock();
        for task in tasks.drain(..) {
            task.abort();
        }
        tasks.push(sweeper);
        tasks.push(monitor);
    }

    /// Cancel both timers and clear every entry and counter.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        let mut state = self.state.lock();
        state.entries.clear();
        state.stats = EmbeddingStats::default();
        drop(state);

        crate::metrics::update_embedding_entries(0);
        debug!("Embedding manager shut down");
    }
}

impl Drop for EmbeddingManager {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

fn spawn_periodic<F>(manager: Weak<EmbeddingManager>, period: Duration, tick: F) -> JoinHandle<()>
where
    F: Fn(&EmbeddingManager) + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match manager.upgrade() {
                Some(manager) => tick(&manager),
                None => break,
            }
        }
    })
}
