// Cached operation orchestrator tests
// Author: kelexine (https://github.com/kelexine)

use async_trait::async_trait;
use parking_lot::Mutex;
use resilience_core::cache::{
    CacheEntry, CacheKeyGenerator, CacheKeyInput, CacheStatus, CachedOperationOrchestrator,
    Computed, InMemoryKeyValueCache, KeyValueCache, OperationRequest, OrchestratorConfig,
};
use resilience_core::error::{ResilienceError, Result};
use resilience_core::metrics::{MetricsSink, OperationSample};
use resilience_core::providers::{InferenceProvider, ProviderChain, ProviderError};
use resilience_core::resilience::{CircuitBreakerConfig, CircuitBreakerManager};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct RecordingSink {
    samples: Mutex<Vec<(String, CacheStatus, String, bool)>>,
}

impl MetricsSink for RecordingSink {
    fn record_operation(&self, sample: &OperationSample<'_>) {
        self.samples.lock().push((
            sample.operation.to_string(),
            sample.status,
            sample.provider.to_string(),
            sample.succeeded,
        ));
    }
}

struct ScriptedProvider {
    name: &'static str,
    calls: AtomicUsize,
    fail_with: Option<ProviderError>,
}

impl ScriptedProvider {
    fn ok(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicUsize::new(0),
            fail_with: None,
        })
    }

    fn failing(name: &'static str, error: ProviderError) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicUsize::new(0),
            fail_with: Some(error),
        })
    }
}

#[async_trait]
impl InferenceProvider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn invoke(
        &self,
        operation: &str,
        _payload: &Value,
    ) -> std::result::Result<Value, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(error) => Err(error.clone()),
            None => Ok(json!({ "operation": operation, "by": self.name })),
        }
    }
}

fn orchestrator(
    cache: Arc<InMemoryKeyValueCache>,
    primary: &str,
) -> CachedOperationOrchestrator {
    CachedOperationOrchestrator::new(
        cache,
        CacheKeyGenerator::default(),
        OrchestratorConfig {
            primary_provider: primary.to_string(),
            ..OrchestratorConfig::default()
        },
    )
}

fn request() -> OperationRequest {
    OperationRequest::new("match", json!({"resume": "Rust", "job": "Backend"}))
}

async fn compute_as(provider: &str, value: Value) -> Result<Computed<Value>> {
    Ok(Computed {
        provider: provider.to_string(),
        value,
    })
}

async fn never_called() -> Result<Computed<Value>> {
    panic!("must be served from cache")
}

async fn rate_limited() -> Result<Computed<Value>> {
    Err(ResilienceError::RateLimited {
        provider: "openai".into(),
        retry_after: Some(Duration::from_secs(3)),
    })
}

#[tokio::test]
async fn test_miss_then_hit() {
    let cache = Arc::new(InMemoryKeyValueCache::new());
    let orch = orchestrator(cache.clone(), "openai");

    let first = orch
        .run(&request(), || compute_as("openai", json!({"score": 0.9})))
        .await
        .unwrap();
    assert_eq!(first.status, CacheStatus::Miss);
    assert!(first.age.is_none());

    let second = orch.run(&request(), never_called).await.unwrap();
    assert_eq!(second.status, CacheStatus::Hit);
    assert_eq!(second.value, json!({"score": 0.9}));
    assert_eq!(second.provider, "openai");

    let stats = orch.stats();
    assert_eq!((stats.misses, stats.hits, stats.stores), (1, 1, 1));
}

#[tokio::test]
async fn test_fallback_hit_names_original_provider() {
    let cache = Arc::new(InMemoryKeyValueCache::new());
    orchestrator(cache.clone(), "anthropic")
        .run(&request(), || compute_as("anthropic", json!("from anthropic")))
        .await
        .unwrap();

    let outcome = orchestrator(cache, "openai")
        .run(&request(), never_called)
        .await
        .unwrap();
    assert_eq!(outcome.status, CacheStatus::FallbackHit);
    assert_eq!(outcome.provider, "anthropic");
}

#[tokio::test]
async fn test_cross_provider_fallback_can_be_disabled() {
    let cache = Arc::new(InMemoryKeyValueCache::new());
    orchestrator(cache.clone(), "anthropic")
        .run(&request(), || compute_as("anthropic", json!(1)))
        .await
        .unwrap();

    let strict = CachedOperationOrchestrator::new(
        cache,
        CacheKeyGenerator::default(),
        OrchestratorConfig {
            cross_provider_fallback: false,
            ..OrchestratorConfig::default()
        },
    );
    let outcome = strict
        .run(&request(), || compute_as("openai", json!(2)))
        .await
        .unwrap();
    assert_eq!(outcome.status, CacheStatus::Miss);
    assert_eq!(outcome.value, json!(2));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_identical_requests_compute_once() {
    let cache = Arc::new(InMemoryKeyValueCache::new());
    let orch = orchestrator(cache, "openai");
    let computes = AtomicUsize::new(0);
    let req = request();
    let (orch_ref, req_ref, counter) = (&orch, &req, &computes);

    let calls = (0..5).map(move |_| {
        orch_ref.run(req_ref, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40)).await;
            compute_as("openai", json!({"score": 42})).await
        })
    });
    let outcomes = futures::future::join_all(calls).await;

    assert_eq!(computes.load(Ordering::SeqCst), 1);
    for outcome in &outcomes {
        assert_eq!(outcome.as_ref().unwrap().value, json!({"score": 42}));
    }
    let deduplicated = outcomes
        .iter()
        .filter(|o| o.as_ref().map(|o| o.deduplicated).unwrap_or(false))
        .count();
    assert_eq!(deduplicated, 4);
    assert_eq!(orch.stats().deduplicated, 4);
}

#[tokio::test(start_paused = true)]
async fn test_waiters_outlast_slow_compute() {
    let cache = Arc::new(InMemoryKeyValueCache::new());
    let orch = orchestrator(cache, "openai");
    let computes = AtomicUsize::new(0);
    let req = request();
    let (orch_ref, req_ref, counter) = (&orch, &req, &computes);

    // Several poll intervals long
    let calls = (0..5).map(move |_| {
        orch_ref.run(req_ref, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(500)).await;
            compute_as("openai", json!({"score": 7})).await
        })
    });
    let outcomes = futures::future::join_all(calls).await;

    assert_eq!(computes.load(Ordering::SeqCst), 1);
    assert!(outcomes.iter().all(|o| o.as_ref().unwrap().value == json!({"score": 7})));
    assert_eq!(orch.stats().deduplicated, 4);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_takes_over_after_holder_fails() {
    let cache = Arc::new(InMemoryKeyValueCache::new());
    let orch = orchestrator(cache.clone(), "openai");
    let req = request();

    let holder = orch.run(&req, || async {
        tokio::time::sleep(Duration::from_millis(250)).await;
        rate_limited().await
    });
    let waiter = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        orch.run(&req, || compute_as("openai", json!("second try")))
            .await
    };
    let (held, waited) = tokio::join!(holder, waiter);

    assert!(held.unwrap_err().is_rate_limited());
    let waited = waited.unwrap();
    assert_eq!(waited.status, CacheStatus::Miss);
    assert_eq!(waited.value, json!("second try"));
    // Entry stored, lock released
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_oversized_result_is_returned_but_not_cached() {
    let cache = Arc::new(InMemoryKeyValueCache::new());
    let orch = CachedOperationOrchestrator::new(
        cache.clone(),
        CacheKeyGenerator::default(),
        OrchestratorConfig {
            max_entry_bytes: 64,
            ..OrchestratorConfig::default()
        },
    );
    let big = json!("x".repeat(500));

    let outcome = orch
        .run(&request(), || compute_as("openai", big.clone()))
        .await
        .unwrap();
    assert_eq!(outcome.value, big);
    assert_eq!(orch.stats().oversized, 1);

    let payload = request().payload;
    let key = orch.keys().generate(
        &CacheKeyInput {
            operation: "match",
            payload: &payload,
            tenant: None,
        },
        "openai",
    );
    assert_eq!(cache.get(&key).await.unwrap(), None);
    // Lock released
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_cache_outage_degrades_to_compute() {
    let cache = Arc::new(InMemoryKeyValueCache::new());
    cache.set_offline(true);
    let orch = orchestrator(cache.clone(), "openai");

    for _ in 0..2 {
        let outcome = orch
            .run(&request(), || compute_as("openai", json!("fresh")))
            .await
            .unwrap();
        assert_eq!(outcome.status, CacheStatus::Miss);
    }
    let stats = orch.stats();
    assert_eq!(stats.misses, 2);
    assert!(stats.backend_errors >= 2);

    cache.set_offline(false);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_compute_failure_is_not_cached_and_lock_released() {
    let cache = Arc::new(InMemoryKeyValueCache::new());
    let orch = orchestrator(cache.clone(), "openai");

    let failed = orch.run(&request(), rate_limited).await;
    assert!(failed.unwrap_err().is_rate_limited());
    assert!(cache.is_empty());

    let retried = orch
        .run(&request(), || compute_as("openai", json!("ok")))
        .await
        .unwrap();
    assert_eq!(retried.status, CacheStatus::Miss);
}

#[tokio::test]
async fn test_corrupt_entry_is_treated_as_miss() {
    let cache = Arc::new(InMemoryKeyValueCache::new());
    let orch = orchestrator(cache.clone(), "openai");
    let payload = request().payload;
    let key = orch.keys().generate(
        &CacheKeyInput {
            operation: "match",
            payload: &payload,
            tenant: None,
        },
        "openai",
    );
    cache
        .set(&key, "{not json".to_string(), Duration::from_secs(60))
        .await
        .unwrap();

    let outcome = orch
        .run(&request(), || compute_as("openai", json!("recomputed")))
        .await
        .unwrap();
    assert_eq!(outcome.status, CacheStatus::Miss);
    assert_eq!(outcome.value, json!("recomputed"));
}

#[tokio::test]
async fn test_entry_records_tier_and_provider() {
    let cache = Arc::new(InMemoryKeyValueCache::new());
    let orch = orchestrator(cache.clone(), "openai");
    let req = request().with_tier("premium");

    orch.run(&req, || compute_as("openai", json!({"score": 0.4})))
        .await
        .unwrap();

    let key = orch.keys().generate(
        &CacheKeyInput {
            operation: "match",
            payload: &req.payload,
            tenant: None,
        },
        "openai",
    );
    let raw = cache.get(&key).await.unwrap().expect("entry stored");
    let entry: CacheEntry<Value> = serde_json::from_str(&raw).unwrap();
    assert_eq!(entry.tier, "premium");
    assert_eq!(entry.provider, "openai");
    assert_eq!(entry.data, json!({"score": 0.4}));
}

#[tokio::test]
async fn test_purge_by_provider() {
    let cache = Arc::new(InMemoryKeyValueCache::new());
    let orch = orchestrator(cache.clone(), "openai");
    orch.run(&request(), || compute_as("openai", json!(1))).await.unwrap();
    orch.run(&OperationRequest::new("match", json!({"other": true})), || {
        compute_as("gemini", json!(2))
    })
    .await
    .unwrap();

    assert_eq!(orch.purge("match", Some("gemini")).await.unwrap(), 1);
    assert_eq!(orch.purge("match", None).await.unwrap(), 1);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_metrics_sink_sees_every_call() {
    let sink = Arc::new(RecordingSink::default());
    let orch = orchestrator(Arc::new(InMemoryKeyValueCache::new()), "openai")
        .with_metrics_sink(sink.clone());

    orch.run(&request(), || compute_as("openai", json!(1))).await.unwrap();
    orch.run(&request(), || compute_as("openai", json!(1))).await.unwrap();

    let samples = sink.samples.lock();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].1, CacheStatus::Miss);
    assert_eq!(samples[1].1, CacheStatus::Hit);
    assert!(samples.iter().all(|s| s.0 == "match" && s.3));
}

#[tokio::test]
async fn test_provider_chain_falls_through_to_next_provider() {
    let breakers = Arc::new(CircuitBreakerManager::new(CircuitBreakerConfig {
        failure_threshold: 1,
        ..CircuitBreakerConfig::default()
    }));
    let openai = ScriptedProvider::failing("openai", ProviderError::Unavailable("503".into()));
    let anthropic = ScriptedProvider::ok("anthropic");
    let chain = ProviderChain::new(breakers.clone())
        .with_provider(openai.clone())
        .with_provider(anthropic.clone());

    let cache = Arc::new(InMemoryKeyValueCache::new());
    let orch = orchestrator(cache, "openai");

    let first = orch.run_with_providers(&request(), &chain).await.unwrap();
    assert_eq!(first.provider, "anthropic");
    assert_eq!(first.status, CacheStatus::Miss);

    // Stored under the serving provider's key, so the next call is a fallback hit
    let second = orch.run_with_providers(&request(), &chain).await.unwrap();
    assert_eq!(second.status, CacheStatus::FallbackHit);
    assert_eq!(openai.calls.load(Ordering::SeqCst), 1);
    assert_eq!(anthropic.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_exhausted_chain_reports_last_failure() {
    let breakers = Arc::new(CircuitBreakerManager::default());
    let chain = ProviderChain::new(breakers)
        .with_provider(ScriptedProvider::failing(
            "openai",
            ProviderError::Failed("bad request".into()),
        ))
        .with_provider(ScriptedProvider::failing(
            "gemini",
            ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(2)),
                message: "quota".into(),
            },
        ));
    let orch = orchestrator(Arc::new(InMemoryKeyValueCache::new()), "openai");

    match orch.run_with_providers(&request(), &chain).await {
        Err(ResilienceError::ProvidersExhausted { attempts, last, .. }) => {
            assert_eq!(attempts, vec!["openai", "gemini"]);
            assert!(last.is_rate_limited());
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[tokio::test]
async fn test_open_breaker_skips_provider_without_invoking() {
    let breakers = Arc::new(CircuitBreakerManager::new(CircuitBreakerConfig {
        failure_threshold: 1,
        recovery_timeout: Duration::from_secs(600),
        ..CircuitBreakerConfig::default()
    }));
    let openai = ScriptedProvider::failing("openai", ProviderError::Unavailable("down".into()));
    let gemini = ScriptedProvider::ok("gemini");
    let chain = ProviderChain::new(breakers)
        .with_provider(openai.clone())
        .with_provider(gemini.clone());

    chain.invoke("summarize", &json!({})).await.unwrap();
    let served = chain.invoke("summarize", &json!({})).await.unwrap();

    assert_eq!(served.provider, "gemini");
    assert_eq!(openai.calls.load(Ordering::SeqCst), 1);
    assert_eq!(gemini.calls.load(Ordering::SeqCst), 2);
}
