// Key-value cache backend abstraction and in-process implementation
// Author: kelexine (https://github.com/kelexine)

use crate::error::{ResilienceError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// External key-value cache with per-key TTL (Redis-like).
///
/// Implementations are assumed to fail independently of everything else;
/// callers treat every error as a miss.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Store only if the key is absent (or expired). Returns whether it was stored.
    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> Result<bool>;

    /// Returns whether a live key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove `key` only while it still holds `expected`, as one atomic step
    /// (a compare-and-delete script on Redis). Returns whether it was removed.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool>;

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Expired keys nobody reads again (old key versions) are dropped by a
/// sweep that runs on writes at most this often.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct StoredValue {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Store {
    entries: HashMap<String, StoredValue>,
    last_sweep: Option<Instant>,
}

impl Store {
    fn live(&self, key: &str, now: Instant) -> Option<&StoredValue> {
        self.entries.get(key).filter(|stored| stored.expires_at > now)
    }

    fn insert(&mut self, key: &str, value: String, expires_at: Instant, now: Instant) {
        let due = self
            .last_sweep
            .map_or(true, |last| now.duration_since(last) >= SWEEP_INTERVAL);
        if due {
            self.entries.retain(|_, stored| stored.expires_at > now);
            self.last_sweep = Some(now);
        }
        self.entries
            .insert(key.to_string(), StoredValue { value, expires_at });
    }
}

/// Process-local TTL map. Used in tests and single-node deployments.
///
/// `set_offline(true)` makes every call fail, which is how tests simulate a
/// cache outage.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueCache {
    store: Mutex<Store>,
    offline: AtomicBool,
}

impl InMemoryKeyValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Live entries (expired ones are not counted).
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.store
            .lock()
            .entries
            .values()
            .filter(|v| v.expires_at > now)
            .count()
    }

    /// Entries held in memory, expired ones included.
    pub fn stored_len(&self) -> usize {
        self.store.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(ResilienceError::CacheBackend(
                "in-memory cache is offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueCache for InMemoryKeyValueCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut store = self.store.lock();
        if let Some(stored) = store.live(key, now) {
            return Ok(Some(stored.value.clone()));
        }
        store.entries.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.ensure_online()?;
        let now = Instant::now();
        self.store.lock().insert(key, value, now + ttl, now);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> Result<bool> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut store = self.store.lock();
        if store.live(key, now).is_some() {
            return Ok(false);
        }
        store.insert(key, value, now + ttl, now);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_online()?;
        let now = Instant::now();
        Ok(self
            .store
            .lock()
            .entries
            .remove(key)
            .is_some_and(|stored| stored.expires_at > now))
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut store = self.store.lock();
        if !store.live(key, now).is_some_and(|stored| stored.value == expected) {
            return Ok(false);
        }
        store.entries.remove(key);
        Ok(true)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .store
            .lock()
            .entries
            .iter()
            .filter(|(k, v)| k.starts_with(prefix) && v.expires_at > now)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = InMemoryKeyValueCache::new();
        cache
            .set("k", "v".to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_if_absent() {
        let cache = InMemoryKeyValueCache::new();
        let ttl = Duration::from_secs(60);
        assert!(cache.set_if_absent("lock", "a".into(), ttl).await.unwrap());
        assert!(!cache.set_if_absent("lock", "b".into(), ttl).await.unwrap());
        assert_eq!(cache.get("lock").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_offline_fails_every_call() {
        let cache = InMemoryKeyValueCache::new();
        cache.set_offline(true);
        assert!(cache.get("k").await.is_err());
        assert!(cache.scan_prefix("").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_if_equals_checks_owner() {
        let cache = InMemoryKeyValueCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("lock", "owner-b".into(), ttl).await.unwrap();

        assert!(!cache.delete_if_equals("lock", "owner-a").await.unwrap());
        assert_eq!(cache.get("lock").await.unwrap(), Some("owner-b".to_string()));
        assert!(cache.delete_if_equals("lock", "owner-b").await.unwrap());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_swept_on_write() {
        let cache = InMemoryKeyValueCache::new();
        for i in 0..10 {
            cache
                .set(&format!("analysis:match:v1:{i}"), "old".into(), Duration::from_secs(60))
                .await
                .unwrap();
        }
        assert_eq!(cache.stored_len(), 10);

        // Old-version keys are never read again
        tokio::time::advance(Duration::from_secs(61)).await;
        cache
            .set("analysis:match:v2:0", "new".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.stored_len(), 1);
        assert_eq!(cache.len(), 1);
    }
}
