//! Primary/fallback storage routing with health probing and write replay.
//!
//! The gateway presents a single storage interface. Calls go to the primary
//! while it is believed available; any primary failure is absorbed by
//! serving the same call from the in-memory fallback. Writes served by the
//! fallback are queued as [`StorageCommand`]s and replayed against the
//! primary, in order, once it recovers.
//!
//! Reads during an outage come from the fallback alone. The two backends are
//! never merged, so primary and fallback may diverge until replay finishes.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use super::backend::{StorageBackend, StorageCommand, StorageReply};
use super::health::{DependencyHealth, HealthState};
use super::replay::ReplayReport;
use crate::error::{ResilienceError, Result};
use crate::utils::retry::{create_backoff, with_retry};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Consecutive primary failures that mark it unavailable.
    pub failure_threshold: u32,
    pub probe_interval: Duration,
    pub probe_initial_backoff: Duration,
    /// Out-of-band probe gives up after this long.
    pub probe_max_elapsed: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            probe_interval: Duration::from_secs(30),
            probe_initial_backoff: Duration::from_millis(500),
            probe_max_elapsed: Duration::from_secs(30),
        }
    }
}

struct GatewayInner {
    primary: Arc<dyn StorageBackend>,
    fallback: Arc<dyn StorageBackend>,
    config: GatewayConfig,
    health: Mutex<HealthState>,
    /// Serializes replay passes.
    replay_lock: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Cheap to clone; clones share health state and the replay queue.
#[derive(Clone)]
pub struct HybridStorageGateway {
    inner: Arc<GatewayInner>,
}

impl HybridStorageGateway {
    pub fn new(
        primary: Arc<dyn StorageBackend>,
        fallback: Arc<dyn StorageBackend>,
        config: GatewayConfig,
    ) -> Self {
        crate::metrics::update_storage_availability(primary.name(), true);
        Self {
            inner: Arc::new(GatewayInner {
                primary,
                fallback,
                config,
                health: Mutex::new(HealthState::new()),
                replay_lock: tokio::sync::Mutex::new(()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn health(&self) -> DependencyHealth {
        self.inner.health.lock().snapshot()
    }

    pub fn is_available(&self) -> bool {
        self.inner.health.lock().is_available
    }

    /// Writes waiting for replay, oldest first.
    pub fn queued_writes(&self) -> Vec<StorageCommand> {
        self.inner.health.lock().queue.snapshot()
    }

    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let command = StorageCommand::Get {
            collection: collection.to_string(),
            id: id.to_string(),
        };
        match self.execute(command).await? {
            StorageReply::Found(document) => Ok(document),
            other => Err(unexpected_reply("get", &other)),
        }
    }

    pub async fn list(&self, collection: &str) -> Result<Vec<Value>> {
        let command = StorageCommand::List {
            collection: collection.to_string(),
        };
        match self.execute(command).await? {
            StorageReply::Listed(documents) => Ok(documents),
            other => Err(unexpected_reply("list", &other)),
        }
    }

    pub async fn insert(&self, collection: &str, id: &str, document: Value) -> Result<()> {
        let command = StorageCommand::Insert {
            collection: collection.to_string(),
            id: id.to_string(),
            document,
        };
        match self.execute(command).await? {
            StorageReply::Stored => Ok(()),
            other => Err(unexpected_reply("insert", &other)),
        }
    }

    pub async fn update(&self, collection: &str, id: &str, document: Value) -> Result<()> {
        let command = StorageCommand::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            document,
        };
        match self.execute(command).await? {
            StorageReply::Stored => Ok(()),
            other => Err(unexpected_reply("update", &other)),
        }
    }

    pub async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let command = StorageCommand::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        };
        match self.execute(command).await? {
            StorageReply::Removed(removed) => Ok(removed),
            other => Err(unexpected_reply("delete", &other)),
        }
    }

    /// Route one command. Errors only when the fallback fails too.
    pub async fn execute(&self, command: StorageCommand) -> Result<StorageReply> {
        let (available, needs_drain) = {
            let health = self.inner.health.lock();
            (
                health.is_available,
                !health.queue.is_empty() || health.recovery_mode,
            )
        };

        if !available {
            return self.serve_from_fallback(command).await;
        }

        // Earlier deferred writes must land on the primary before this one,
        // and only once the primary answers again.
        if needs_drain && command.is_write() {
            if let Err(e) = self.drain_before_write().await {
                return self.fallback_after_primary_failure(command, e).await;
            }
        }

        let primary = &self.inner.primary;
        match primary.apply(&command).await {
            Ok(reply) => {
                self.inner.health.lock().record_success();
                crate::metrics::record_storage_operation(primary.name(), command.name(), "ok");
                Ok(reply)
            }
            Err(e) => {
                crate::metrics::record_storage_operation(primary.name(), command.name(), "error");
                self.fallback_after_primary_failure(command, e).await
            }
        }
    }

    /// Ping the primary, then replay the queue. Fails without touching the
    /// queue when the primary does not answer, and fails if the pass had to
    /// leave commands queued.
    async fn drain_before_write(&self) -> Result<()> {
        let primary = &self.inner.primary;
        primary.ping().await?;
        let report = self.replay_queue().await;
        if report.deferred > 0 {
            return Err(ResilienceError::Storage {
                backend: primary.name().to_string(),
                message: format!("replay interrupted with {} writes pending", report.deferred),
            });
        }
        Ok(())
    }

    /// Count a primary failure, flip availability at the threshold and serve
    /// the command from the fallback.
    async fn fallback_after_primary_failure(
        &self,
        command: StorageCommand,
        error: ResilienceError,
    ) -> Result<StorageReply> {
        let primary = &self.inner.primary;
        let (flipped, schedule_probe) = {
            let mut health = self.inner.health.lock();
            let flipped = health.record_failure(self.inner.config.failure_threshold);
            let schedule = flipped && !health.probe_scheduled;
            if schedule {
                health.probe_scheduled = true;
            }
            (flipped, schedule)
        };

        warn!(
            backend = primary.name(),
            command = command.name(),
            "Primary storage failed, serving from fallback: {}",
            error
        );

        if flipped {
            warn!(
                backend = primary.name(),
                threshold = self.inner.config.failure_threshold,
                "Primary storage marked unavailable"
            );
            crate::metrics::update_storage_availability(primary.name(), false);
        }
        if schedule_probe {
            self.schedule_recovery_probe();
        }

        self.serve_from_fallback(command).await
    }

    async fn serve_from_fallback(&self, command: StorageCommand) -> Result<StorageReply> {
        let fallback = &self.inner.fallback;
        let reply = fallback.apply(&command).await;
        let outcome = if reply.is_ok() { "ok" } else { "error" };
        crate::metrics::record_storage_operation(fallback.name(), command.name(), outcome);

        let reply = reply?;
        if command.is_write() {
            let depth = {
                let mut health = self.inner.health.lock();
                health.queue.push(command);
                health.queue.len()
            };
            debug!(depth, "Queued write for replay");
            crate::metrics::update_replay_queue_depth(self.inner.primary.name(), depth);
        }
        Ok(reply)
    }

    /// Run one probe round: ping the primary and update health.
    ///
    /// A successful ping while unavailable flips the primary back and awaits
    /// the replay of every queued write. Returns whether the ping succeeded.
    pub async fn probe(&self) -> bool {
        let ok = match self.inner.primary.ping().await {
            Ok(()) => true,
            Err(e) => {
                debug!(backend = self.inner.primary.name(), "Storage probe failed: {}", e);
                false
            }
        };
        self.apply_probe_result(ok).await;
        ok
    }

    async fn apply_probe_result(&self, ok: bool) {
        let name = self.inner.primary.name();
        let (recovered, pending) = {
            let mut health = self.inner.health.lock();
            if ok {
                let recovered = !health.is_available;
                health.is_available = true;
                health.consecutive_failed_ops = 0;
                health.last_available_time = Some(chrono::Utc::now());
                (recovered, !health.queue.is_empty())
            } else {
                if health.is_available {
                    health.is_available = false;
                    warn!(backend = name, "Primary storage marked unavailable by probe");
                    crate::metrics::update_storage_availability(name, false);
                }
                (false, false)
            }
        };

        if recovered {
            info!(backend = name, "Primary storage recovered");
            crate::metrics::update_storage_availability(name, true);
        }
        if pending {
            self.replay_queue().await;
        }
    }

    /// Replay queued writes against the primary in enqueue order.
    ///
    /// A command the primary rejects while still answering pings is logged
    /// and dropped; the rest still run. If the primary stops answering, the
    /// failed command and everything after it go back to the front of the
    /// queue. Only one pass runs at a time and a second caller waits for the
    /// first.
    pub async fn replay_queue(&self) -> ReplayReport {
        let _pass = self.inner.replay_lock.lock().await;
        let primary = &self.inner.primary;

        let pending = {
            let mut health = self.inner.health.lock();
            if health.queue.is_empty() {
                return ReplayReport::default();
            }
            health.recovery_mode = true;
            health.queue.take_all()
        };
        crate::metrics::update_replay_queue_depth(primary.name(), 0);
        info!(backend = primary.name(), count = pending.len(), "Replaying deferred writes");

        let mut report = ReplayReport::default();
        let mut pending = VecDeque::from(pending);
        while let Some(command) = pending.pop_front() {
            let Err(e) = primary.apply(&command).await else {
                report.replayed += 1;
                crate::metrics::record_replay("replayed");
                continue;
            };

            if primary.ping().await.is_err() {
                let mut remaining = vec![command];
                remaining.extend(pending.drain(..));
                report.deferred = remaining.len();
                let depth = {
                    let mut health = self.inner.health.lock();
                    health.queue.requeue_front(remaining);
                    health.queue.len()
                };
                crate::metrics::record_replay("deferred");
                crate::metrics::update_replay_queue_depth(primary.name(), depth);
                warn!(
                    backend = primary.name(),
                    deferred = report.deferred,
                    "Primary stopped answering during replay, keeping writes queued: {}",
                    e
                );
                break;
            }

            report.failed += 1;
            crate::metrics::record_replay("failed");
            let err = ResilienceError::Replay {
                command: command.name().to_string(),
                message: e.to_string(),
            };
            warn!(
                backend = primary.name(),
                collection = command.collection(),
                "Skipping write: {}",
                err
            );
        }

        self.inner.health.lock().recovery_mode = false;
        info!(
            backend = primary.name(),
            replayed = report.replayed,
            failed = report.failed,
            deferred = report.deferred,
            "Replay finished"
        );
        report
    }

    /// Retry `ping` with exponential backoff until the primary answers or
    /// the backoff's elapsed budget runs out. One per outage.
    fn schedule_recovery_probe(&self) {
        let gateway = self.clone();
        let backoff = create_backoff(
            self.inner.config.probe_initial_backoff,
            self.inner.config.probe_max_elapsed,
        );

        let handle = tokio::spawn(async move {
            let primary = Arc::clone(&gateway.inner.primary);
            let result = with_retry("primary storage probe", backoff, || {
                let primary = Arc::clone(&primary);
                async move { primary.ping().await }
            })
            .await;

            gateway.inner.health.lock().probe_scheduled = false;
            match result {
                Ok(()) => gateway.apply_probe_result(true).await,
                Err(e) => warn!(
                    backend = primary.name(),
                    "Out-of-band probe gave up, periodic probe continues: {}",
                    e
                ),
            }
        });

        let mut tasks = self.inner.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Spawn the periodic health probe.
    pub fn start(&self) {
        let weak: Weak<GatewayInner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.probe_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                HybridStorageGateway { inner }.probe().await;
            }
        });
        self.inner.tasks.lock().push(handle);
        debug!(interval_secs = period.as_secs(), "Storage health probe started");
    }

    /// Abort the periodic probe and any out-of-band probe.
    pub fn shutdown(&self) {
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

fn unexpected_reply(command: &str, reply: &StorageReply) -> ResilienceError {
    ResilienceError::Internal(format!("unexpected reply to {}: {:?}", command, reply))
}
