//! Explicitly constructed service object owning every resilience component.
//!
//! Nothing in the crate is a process-wide singleton except the prometheus
//! registry. A `ResilienceContext` is built once from [`AppConfig`] plus the
//! external collaborators (primary store, key-value cache, providers) and
//! passed to whatever serves requests.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::cache::{
    CacheKeyGenerator, CachedOperationOrchestrator, CachedOutcome, InMemoryKeyValueCache,
    KeyValueCache, OperationRequest,
};
use crate::config::AppConfig;
use crate::embeddings::{EmbeddingManager, MemoryProbe, ProcessMemoryProbe};
use crate::error::Result;
use crate::metrics::{MetricsSink, PrometheusSink};
use crate::providers::{InferenceProvider, ProviderChain};
use crate::resilience::CircuitBreakerManager;
use crate::storage::{HybridStorageGateway, InMemoryStorage, StorageBackend};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub struct ResilienceContext {
    config: AppConfig,
    breakers: Arc<CircuitBreakerManager>,
    orchestrator: Arc<CachedOperationOrchestrator>,
    embeddings: Arc<EmbeddingManager>,
    storage: HybridStorageGateway,
    providers: ProviderChain,
}

impl ResilienceContext {
    pub fn builder(config: AppConfig) -> ResilienceContextBuilder {
        ResilienceContextBuilder {
            config,
            primary_store: None,
            cache: None,
            providers: Vec::new(),
            memory_probe: None,
            metrics_sink: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    pub fn orchestrator(&self) -> &Arc<CachedOperationOrchestrator> {
        &self.orchestrator
    }

    pub fn embeddings(&self) -> &Arc<EmbeddingManager> {
        &self.embeddings
    }

    pub fn storage(&self) -> &HybridStorageGateway {
        &self.storage
    }

    pub fn providers(&self) -> &ProviderChain {
        &self.providers
    }

    /// Cached inference through the provider chain.
    pub async fn infer(&self, request: &OperationRequest) -> Result<CachedOutcome<Value>> {
        self.orchestrator
            .run_with_providers(request, &self.providers)
            .await
    }

    /// Launch breaker idle cleanup, embedding sweeps and the storage probe.
    pub fn start(&self) {
        self.breakers
            .start_idle_cleanup(self.config.breaker.cleanup_interval());
        self.embeddings.start();
        self.storage.start();
        info!("Resilience background tasks started");
    }

    /// Stop every background task and clear embedding state.
    pub fn shutdown(&self) {
        self.breakers.shutdown();
        self.embeddings.shutdown();
        self.storage.shutdown();
        info!("Resilience background tasks stopped");
    }
}

pub struct ResilienceContextBuilder {
    config: AppConfig,
    primary_store: Option<Arc<dyn StorageBackend>>,
    cache: Option<Arc<dyn KeyValueCache>>,
    providers: Vec<Arc<dyn InferenceProvider>>,
    memory_probe: Option<Arc<dyn MemoryProbe>>,
    metrics_sink: Option<Arc<dyn MetricsSink>>,
}

impl ResilienceContextBuilder {
    /// Defaults to an in-memory store named `primary`.
    pub fn primary_store(mut self, store: Arc<dyn StorageBackend>) -> Self {
        self.primary_store = Some(store);
        self
    }

    /// Defaults to a process-local TTL map.
    pub fn cache(mut self, cache: Arc<dyn KeyValueCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn InferenceProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory_probe = Some(probe);
        self
    }

    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = Some(sink);
        self
    }

    /// Validate the config and wire every component.
    ///
    /// Providers are ordered by their position in `cache.providers`; ones
    /// not listed there keep registration order after the listed ones.
    pub fn build(self) -> Result<ResilienceContext> {
        let config = self.config;
        config.validate()?;

        let breakers = Arc::new(CircuitBreakerManager::new(
            config.breaker.to_breaker_config(),
        ));

        let keys = CacheKeyGenerator::new(&config.keys.namespace, config.keys.to_versions())
            .with_default_tenant(&config.keys.default_tenant);
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(InMemoryKeyValueCache::new()));
        let metrics = self.metrics_sink.unwrap_or_else(|| Arc::new(PrometheusSink));
        let orchestrator = Arc::new(
            CachedOperationOrchestrator::new(cache, keys, config.cache.to_orchestrator_config())
                .with_metrics_sink(metrics),
        );

        let memory = self
            .memory_probe
            .unwrap_or_else(|| Arc::new(ProcessMemoryProbe));
        let embeddings = Arc::new(EmbeddingManager::new(
            config.embeddings.to_embedding_config(),
            memory,
        ));

        let primary = self
            .primary_store
            .unwrap_or_else(|| Arc::new(InMemoryStorage::new("primary")));
        let storage = HybridStorageGateway::new(
            primary,
            Arc::new(InMemoryStorage::new("fallback")),
            config.storage.to_gateway_config(),
        );

        let mut providers = self.providers;
        let priority = |provider: &Arc<dyn InferenceProvider>| {
            config
                .cache
                .providers
                .iter()
                .position(|name| name == provider.name())
                .unwrap_or(usize::MAX)
        };
        // Stable sort keeps registration order among unlisted providers
        providers.sort_by_key(priority);
        let providers = providers
            .into_iter()
            .fold(ProviderChain::new(Arc::clone(&breakers)), |chain, p| {
                chain.with_provider(p)
            });

        Ok(ResilienceContext {
            config,
            breakers,
            orchestrator,
            embeddings,
            storage,
            providers,
        })
    }
}
