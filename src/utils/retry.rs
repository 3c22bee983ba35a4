// Retry logic with provider retry-hint support
// Author: kelexine (https://github.com/kelexine)

use backoff::{backoff::Backoff, ExponentialBackoff};
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Longest retry hint honoured from a provider.
const MAX_RETRY_HINT: Duration = Duration::from_secs(60);

/// Extract a retry hint from a provider error body.
///
/// Understands Google's `error.details[].retryDelay` ("0.45s", "40s") and a
/// numeric `error.retry_after` in seconds. Capped at 60 seconds.
pub fn parse_retry_delay(error_json: &str) -> Option<Duration> {
    let parsed: Value = serde_json::from_str(error_json).ok()?;
    let error = parsed.get("error")?;

    if let Some(seconds) = error.get("retry_after").and_then(Value::as_f64) {
        return Some(cap(Duration::from_secs_f64(seconds.max(0.0))));
    }

    let details = error.get("details")?.as_array()?;
    details
        .iter()
        .filter_map(|detail| detail.get("retryDelay").and_then(Value::as_str))
        .find_map(parse_duration_string)
}

/// Parse duration strings like "0.457639761s", "40s", "1.5s"
fn parse_duration_string(duration_str: &str) -> Option<Duration> {
    let seconds: f64 = duration_str.strip_suffix('s')?.parse().ok()?;
    if seconds < 0.0 {
        return None;
    }
    Some(cap(Duration::from_millis((seconds * 1000.0) as u64)))
}

fn cap(delay: Duration) -> Duration {
    delay.min(MAX_RETRY_HINT)
}

/// Exponential backoff starting at `initial`, giving up after `max_elapsed`.
pub fn create_backoff(initial: Duration, max_elapsed: Duration) -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: initial,
        initial_interval: initial,
        randomization_factor: 0.3,
        multiplier: 2.0,
        max_interval: Duration::from_secs(30),
        max_elapsed_time: Some(max_elapsed),
        ..Default::default()
    }
}

/// Determine if an HTTP-like status code signals a transient failure
pub fn is_retryable(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Run `operation` until it succeeds or `backoff` is exhausted.
///
/// Returns the last error when the backoff gives up.
pub async fn with_retry<F, Fut, T, E>(
    operation_name: &str,
    mut backoff: ExponentialBackoff,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) => match backoff.next_backoff() {
                Some(delay) => {
                    debug!(
                        "{} failed (attempt {}): {}, retrying after {}ms",
                        operation_name,
                        attempt,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    debug!("{} giving up after {} attempts: {}", operation_name, attempt, e);
                    return Err(e);
                }
            },
        }
    }
}
