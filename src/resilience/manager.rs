//! Named registry of circuit breakers.
//!
//! One breaker per dependency name, created on first use and shared through
//! `Arc`. Long-lived processes that talk to many distinct dependencies call
//! [`CircuitBreakerManager::cleanup`] (or start the idle sweeper) to bound the
//! registry's memory.

// Author: kelexine (https://github.com/kelexine)

use super::circuit_breaker::{BreakerStatus, CircuitBreaker, CircuitBreakerConfig};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct CircuitBreakerManager {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl CircuitBreakerManager {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config,
            cleanup_task: Mutex::new(None),
        }
    }

    pub fn default_config(&self) -> &CircuitBreakerConfig {
        &self.default_config
    }

    /// Return the breaker for `name`, creating it with `config` (or the
    /// manager default) on first use. Later configs for an existing name are ignored.
    pub fn get_breaker(
        &self,
        name: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write();
        // Another caller may have created it between the two locks
        if let Some(breaker) = breakers.get(name) {
            return Arc::clone(breaker);
        }

        let breaker = Arc::new(CircuitBreaker::new(
            name,
            config.unwrap_or_else(|| self.default_config.clone()),
        ));
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        debug!(
            breaker = name,
            total = breakers.len(),
            "Registered circuit breaker"
        );
        breaker
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// Snapshot every breaker, sorted by name.
    pub fn get_all_status(&self) -> Vec<BreakerStatus> {
        let mut statuses: Vec<BreakerStatus> =
            self.breakers.read().values().map(|b| b.status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Force every breaker closed.
    pub fn reset_all(&self) {
        let breakers = self.breakers.read();
        warn!(count = breakers.len(), "Resetting all circuit breakers");
        for breaker in breakers.values() {
            breaker.reset();
        }
    }

    /// Drop breakers whose last success/failure is older than `max_idle`.
    /// Returns the number removed.
    pub fn cleanup(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut breakers = self.breakers.write();
        let before = breakers.len();
        breakers.retain(|_, breaker| {
            now.saturating_duration_since(breaker.last_activity()) <= max_idle
        });
        let removed = before - breakers.len();
        if removed > 0 {
            info!(
                removed,
                remaining = breakers.len(),
                "Removed idle circuit breakers"
            );
        }
        removed
    }

    pub fn remove(&self, name: &str) -> bool {
        self.breakers.write().remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }

    /// Spawn a periodic sweep removing breakers idle for longer than the
    /// default config's `reset_timeout`. Replaces any sweep already running.
    pub fn start_idle_cleanup(self: &Arc<Self>, interval: Duration) {
        let manager = Arc::downgrade(self);
        let max_idle = self.default_config.reset_timeout;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match manager.upgrade() {
                    Some(manager) => {
                        manager.cleanup(max_idle);
                    }
                    None => break,
                }
            }
        });

        if let Some(previous) = self.cleanup_task.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self.cleanup_task.lock().take() {
            handle.abort();
        }
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl Drop for CircuitBreakerManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
