// Health record for the primary storage dependency
// Author: kelexine (https://github.com/kelexine)

use super::replay::ReplayQueue;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view of the primary's health.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyHealth {
    pub is_available: bool,
    pub last_available_time: Option<DateTime<Utc>>,
    pub consecutive_failed_ops: u32,
    pub consecutive_successful_ops: u32,
    pub recovery_mode: bool,
    pub queued_writes: usize,
}

/// Mutable health state behind the gateway's lock.
#[derive(Debug)]
pub(crate) struct HealthState {
    pub is_available: bool,
    pub last_available_time: Option<DateTime<Utc>>,
    pub consecutive_failed_ops: u32,
    pub consecutive_successful_ops: u32,
    pub recovery_mode: bool,
    pub probe_scheduled: bool,
    pub queue: ReplayQueue,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            is_available: true,
            last_available_time: Some(Utc::now()),
            consecutive_failed_ops: 0,
            consecutive_successful_ops: 0,
            recovery_mode: false,
            probe_scheduled: false,
            queue: ReplayQueue::default(),
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failed_ops = 0;
        self.consecutive_successful_ops = self.consecutive_successful_ops.saturating_add(1);
        self.last_available_time = Some(Utc::now());
    }

    /// Count a primary failure. Returns true when this failure crossed the
    /// threshold and flipped the primary to unavailable.
    pub fn record_failure(&mut self, threshold: u32) -> bool {
        self.consecutive_successful_ops = 0;
        self.consecutive_failed_ops = self.consecutive_failed_ops.saturating_add(1);
        if self.is_available && self.consecutive_failed_ops >= threshold {
            self.is_available = false;
            return true;
        }
        false
    }

    pub fn snapshot(&self) -> DependencyHealth {
        DependencyHealth {
            is_available: self.is_available,
            last_available_time: self.last_available_time,
            consecutive_failed_ops: self.consecutive_failed_ops,
            consecutive_successful_ops: self.consecutive_successful_ops,
            recovery_mode: self.recovery_mode,
            queued_writes: self.queue.len(),
        }
    }
}
