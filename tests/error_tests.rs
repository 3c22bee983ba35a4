// Error handling tests
// Author: kelexine (https://github.com/kelexine)

use resilience_core::error::ResilienceError;
use resilience_core::providers::ProviderError;
use std::time::Duration;

#[test]
fn test_error_display_messages() {
    let errors = vec![
        ResilienceError::DependencyUnavailable {
            dependency: "postgres".to_string(),
            retry_in: Duration::from_secs(12),
        },
        ResilienceError::ComputeFailed {
            provider: "openai".to_string(),
            message: "timeout".to_string(),
        },
        ResilienceError::CacheBackend("connection reset".to_string()),
        ResilienceError::OversizedResult {
            bytes: 300_000,
            limit: 262_144,
        },
        ResilienceError::Replay {
            command: "insert".to_string(),
            message: "duplicate key".to_string(),
        },
        ResilienceError::InvalidInput("empty payload".to_string()),
    ];

    for error in errors {
        let display = format!("{}", error);
        assert!(!display.is_empty(), "Error should have display message");
    }
}

#[test]
fn test_unavailable_message_carries_retry_hint() {
    let error = ResilienceError::DependencyUnavailable {
        dependency: "openai".to_string(),
        retry_in: Duration::from_secs(42),
    };
    assert_eq!(error.to_string(), "openai unavailable, retry in 42s");
    assert_eq!(error.retry_after(), Some(Duration::from_secs(42)));
}

#[test]
fn test_kind_labels_are_stable() {
    assert_eq!(
        ResilienceError::CacheBackend(String::new()).kind(),
        "cache_backend"
    );
    assert_eq!(
        ResilienceError::Config("bad".to_string()).kind(),
        "configuration"
    );
    assert_eq!(
        ResilienceError::OversizedResult { bytes: 2, limit: 1 }.kind(),
        "oversized_result"
    );
}

#[test]
fn test_exhausted_chain_exposes_last_failure() {
    let error = ResilienceError::ProvidersExhausted {
        operation: "match".to_string(),
        attempts: vec!["openai".to_string(), "anthropic".to_string()],
        last: Box::new(
            ProviderError::from_status(429, r#"{"error": {"retry_after": 5}}"#)
                .into_resilience_error("anthropic"),
        ),
    };

    assert!(error.is_rate_limited());
    assert_eq!(error.retry_after(), Some(Duration::from_secs(5)));
    assert!(error.to_string().contains("openai, anthropic"));
}

#[test]
fn test_json_error_conversion() {
    let parse: Result<serde_json::Value, _> = serde_json::from_str("{oops");
    let error: ResilienceError = parse.unwrap_err().into();
    assert_eq!(error.kind(), "json");
}
