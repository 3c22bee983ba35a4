//! Per-dependency circuit breaker.
//!
//! A breaker wraps every call to one fallible dependency (a provider, a
//! database) and tracks its consecutive failures and successes. Once the
//! failure streak reaches the threshold the circuit opens and calls are
//! rejected without touching the dependency. The open → half-open transition
//! is checked lazily on the next call, there is no timer.
//!
//! ```text
//! Closed   → Open:     consecutive_failures >= failure_threshold
//! Open     → HalfOpen: now - last_failure >= recovery_timeout (on next call)
//! HalfOpen → Closed:   consecutive_successes >= half_open_max_calls
//! HalfOpen → Open:     consecutive_failures >= failure_threshold again
//! ```

// Author: kelexine (https://github.com/kelexine)

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Number of samples kept for the rolling average response time.
const RESPONSE_TIME_SAMPLES: usize = 10;

/// Thresholds for a single breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time after the last failure before an open circuit lets a probe through.
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes that close the circuit.
    pub half_open_max_calls: u32,
    /// Idle time after which the manager may drop the breaker.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    /// - `failure_threshold`: 5
    /// - `recovery_timeout`: 60s
    /// - `half_open_max_calls`: 3
    /// - `reset_timeout`: 5 minutes
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
            reset_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Numeric encoding exported as the breaker state gauge.
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// The circuit is open; the operation was not invoked.
    #[error("{name} unavailable, retry in {}s", retry_in.as_secs())]
    Open { name: String, retry_in: Duration },

    /// The operation ran and failed; the failure has been recorded.
    #[error("operation failed: {0}")]
    Operation(E),
}

/// Outcome of [`CircuitBreaker::execute`].
#[derive(Debug)]
pub struct ExecutionResult<T, E> {
    pub result: Result<T, CircuitBreakerError<E>>,
    /// Wall time of the operation; zero when the call was rejected.
    pub response_time: Duration,
}

impl<T, E> ExecutionResult<T, E> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn was_rejected(&self) -> bool {
        matches!(self.result, Err(CircuitBreakerError::Open { .. }))
    }

    pub fn into_result(self) -> Result<T, CircuitBreakerError<E>> {
        self.result
    }
}

/// Serializable snapshot of a breaker for observability endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub average_response_time_ms: f64,
    /// Milliseconds until an open circuit admits a probe.
    pub next_retry_in_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    total_failures: u64,
    total_successes: u64,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    response_times: VecDeque<Duration>,
    next_retry: Option<Instant>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_failures: 0,
            total_successes: 0,
            last_failure: None,
            last_success: None,
            last_failure_at: None,
            last_success_at: None,
            response_times: VecDeque::with_capacity(RESPONSE_TIME_SAMPLES),
            next_retry: None,
        }
    }

    fn push_sample(&mut self, sample: Duration) {
        if self.response_times.len() == RESPONSE_TIME_SAMPLES {
            self.response_times.pop_front();
        }
        self.response_times.push_back(sample);
    }

    fn average_response_time(&self) -> Duration {
        if self.response_times.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.response_times.iter().sum();
        total / self.response_times.len() as u32
    }
}

/// Breaker guarding one named dependency. Shared via `Arc`; all state sits
/// behind a single mutex that is never held across an await.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    created: Instant,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        debug!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            recovery_timeout_ms = config.recovery_timeout.as_millis() as u64,
            half_open_max_calls = config.half_open_max_calls,
            "Circuit breaker initialized"
        );
        crate::metrics::record_breaker_state(&name, CircuitState::Closed);

        Self {
            name,
            config,
            created: Instant::now(),
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state without triggering the lazy open → half-open check.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Run `operation` under breaker protection.
    ///
    /// While open the operation is never invoked; the result carries the
    /// remaining cool-down instead. There is no built-in retry.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ExecutionResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Err(retry_in) = self.try_acquire() {
            crate::metrics::record_breaker_call(&self.name, "rejected");
            return ExecutionResult {
                result: Err(CircuitBreakerError::Open {
                    name: self.name.clone(),
                    retry_in,
                }),
                response_time: Duration::ZERO,
            };
        }

        let start = Instant::now();
        let result = operation().await;
        let response_time = start.elapsed();

        match result {
            Ok(value) => {
                self.record_success(response_time);
                ExecutionResult {
                    result: Ok(value),
                    response_time,
                }
            }
            Err(e) => {
                self.record_failure(response_time);
                ExecutionResult {
                    result: Err(CircuitBreakerError::Operation(e)),
                    response_time,
                }
            }
        }
    }

    /// Admission check. Returns the remaining cool-down when the call must be rejected.
    fn try_acquire(&self) -> Result<(), Duration> {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let now = Instant::now();
        let reopen_at = inner
            .last_failure
            .map(|t| t + self.config.recovery_timeout)
            .unwrap_or(now);

        if now >= reopen_at {
            inner.state = CircuitState::HalfOpen;
            inner.consecutive_failures = 0;
            inner.consecutive_successes = 0;
            inner.next_retry = None;
            drop(inner);

            info!(breaker = %self.name, "Circuit breaker half-open, letting probe through");
            crate::metrics::record_breaker_state(&self.name, CircuitState::HalfOpen);
            Ok(())
        } else {
            Err(reopen_at - now)
        }
    }

    /// Record a successful call. Resets the failure streak.
    pub fn record_success(&self, response_time: Duration) {
        let mut inner = self.inner.lock();
        inner.consecutive_successes += 1;
        inner.consecutive_failures = 0;
        inner.total_successes += 1;
        inner.last_success = Some(Instant::now());
        inner.last_success_at = Some(Utc::now());
        inner.push_sample(response_time);

        let closes = inner.state == CircuitState::HalfOpen
            && inner.consecutive_successes >= self.config.half_open_max_calls;
        if closes {
            inner.state = CircuitState::Closed;
            inner.next_retry = None;
        }
        drop(inner);

        crate::metrics::record_breaker_call(&self.name, "success");
        if closes {
            info!(breaker = %self.name, "Circuit breaker closed (recovered)");
            crate::metrics::record_breaker_state(&self.name, CircuitState::Closed);
        }
    }

    /// Record a failed call. Resets the success streak and may open the circuit.
    pub fn record_failure(&self, response_time: Duration) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        inner.consecutive_successes = 0;
        inner.total_failures += 1;
        inner.last_failure = Some(now);
        inner.last_failure_at = Some(Utc::now());
        inner.push_sample(response_time);

        let opens = inner.state != CircuitState::Open
            && inner.consecutive_failures >= self.config.failure_threshold;
        if opens {
            inner.state = CircuitState::Open;
        }
        if inner.state == CircuitState::Open {
            inner.next_retry = Some(now + self.config.recovery_timeout);
        }
        let failures = inner.consecutive_failures;
        drop(inner);

        crate::metrics::record_breaker_call(&self.name, "failure");
        if opens {
            warn!(
                breaker = %self.name,
                consecutive_failures = failures,
                recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                "Circuit breaker opened"
            );
            crate::metrics::record_breaker_state(&self.name, CircuitState::Open);
        }
    }

    /// Force the circuit open as if the failure threshold had just been reached.
    pub fn force_open(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Open;
        inner.last_failure = Some(now);
        inner.last_failure_at = Some(Utc::now());
        inner.next_retry = Some(now + self.config.recovery_timeout);
        drop(inner);

        warn!(breaker = %self.name, "Circuit breaker forced open");
        crate::metrics::record_breaker_state(&self.name, CircuitState::Open);
    }

    /// Force the circuit closed and clear both streaks. Totals are kept.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.next_retry = None;
        drop(inner);

        info!(breaker = %self.name, "Circuit breaker reset");
        crate::metrics::record_breaker_state(&self.name, CircuitState::Closed);
    }

    /// Most recent success or failure, or creation time if never used.
    pub fn last_activity(&self) -> Instant {
        let inner = self.inner.lock();
        [inner.last_success, inner.last_failure]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(self.created)
    }

    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock();
        let now = Instant::now();
        BreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            last_failure_at: inner.last_failure_at,
            last_success_at: inner.last_success_at,
            average_response_time_ms: inner.average_response_time().as_secs_f64() * 1000.0,
            next_retry_in_ms: inner
                .next_retry
                .map(|at| at.saturating_duration_since(now).as_millis() as u64),
        }
    }
}
