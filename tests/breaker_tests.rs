// Circuit breaker and registry tests
// Author: kelexine (https://github.com/kelexine)

use resilience_core::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerManager, CircuitState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn config(
    failure_threshold: u32,
    recovery_ms: u64,
    half_open_max_calls: u32,
) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold,
        recovery_timeout: Duration::from_millis(recovery_ms),
        half_open_max_calls,
        ..CircuitBreakerConfig::default()
    }
}

async fn fail(breaker: &CircuitBreaker, calls: &AtomicUsize) -> bool {
    breaker
        .execute(move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("boom")
        })
        .await
        .was_rejected()
}

async fn succeed(breaker: &CircuitBreaker, calls: &AtomicUsize) -> bool {
    breaker
        .execute(move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        })
        .await
        .is_success()
}

#[tokio::test(start_paused = true)]
async fn test_two_failures_open_then_recover_after_timeout() {
    let breaker = CircuitBreaker::new("primary-db", config(2, 1000, 3));
    let calls = AtomicUsize::new(0);

    assert!(!fail(&breaker, &calls).await);
    assert!(!fail(&breaker, &calls).await);
    assert_eq!(breaker.state(), CircuitState::Open);

    // Third call inside the recovery window never reaches the operation
    let counter = &calls;
    let outcome = breaker
        .execute(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        })
        .await;
    match outcome.result {
        Err(CircuitBreakerError::Open { name, retry_in }) => {
            assert_eq!(name, "primary-db");
            assert!(retry_in <= Duration::from_millis(1000));
        }
        other => panic!("expected open rejection, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    tokio::time::sleep(Duration::from_millis(1000)).await;

    assert!(succeed(&breaker, &calls).await);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_closes_after_success_streak() {
    let breaker = CircuitBreaker::new("openai", config(1, 500, 2));
    let calls = AtomicUsize::new(0);

    fail(&breaker, &calls).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(succeed(&breaker, &calls).await);
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert!(succeed(&breaker, &calls).await);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_single_half_open_failure_reopens_with_threshold_one() {
    let breaker = CircuitBreaker::new("anthropic", config(1, 500, 3));
    let calls = AtomicUsize::new(0);

    fail(&breaker, &calls).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(!fail(&breaker, &calls).await);
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(fail(&breaker, &calls).await, "reopened circuit must reject");
}

#[tokio::test(start_paused = true)]
async fn test_half_open_needs_fresh_failure_streak_to_reopen() {
    let breaker = CircuitBreaker::new("gemini", config(2, 500, 3));
    let calls = AtomicUsize::new(0);

    fail(&breaker, &calls).await;
    fail(&breaker, &calls).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    fail(&breaker, &calls).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    fail(&breaker, &calls).await;
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_failure_resets_success_streak() {
    let breaker = CircuitBreaker::new("svc", config(3, 100, 2));
    let calls = AtomicUsize::new(0);

    succeed(&breaker, &calls).await;
    fail(&breaker, &calls).await;
    let status = breaker.status();
    assert_eq!(status.consecutive_successes, 0);
    assert_eq!(status.consecutive_failures, 1);
    assert_eq!(status.total_successes, 1);
    assert_eq!(status.total_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_manager_cleanup_drops_idle_breakers() {
    let manager = CircuitBreakerManager::new(CircuitBreakerConfig::default());
    manager.get_breaker("stale", None);
    tokio::time::sleep(Duration::from_secs(400)).await;
    manager.get_breaker("fresh", None);

    assert_eq!(manager.cleanup(Duration::from_secs(300)), 1);
    assert_eq!(manager.names(), vec!["fresh".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_idle_cleanup_task_runs_periodically() {
    let manager = Arc::new(CircuitBreakerManager::new(config(5, 1000, 3)));
    manager.get_breaker("short-lived", None);
    manager.start_idle_cleanup(Duration::from_secs(60));

    tokio::time::sleep(Duration::from_secs(400)).await;
    assert!(manager.is_empty());
    manager.shutdown();
}

#[tokio::test]
async fn test_reset_all_closes_every_circuit() {
    let manager = CircuitBreakerManager::new(config(1, 60_000, 3));
    let calls = AtomicUsize::new(0);
    for name in ["a", "b"] {
        let breaker = manager.get_breaker(name, None);
        fail(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    manager.reset_all();
    assert!(manager
        .get_all_status()
        .iter()
        .all(|s| s.state == CircuitState::Closed));
}
