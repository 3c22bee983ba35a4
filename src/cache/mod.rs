// Cache management module
// Author: kelexine (https://github.com/kelexine)

pub mod backend;
pub mod keys;
pub mod models;
pub mod orchestrator;

pub use backend::{InMemoryKeyValueCache, KeyValueCache};
pub use keys::{canonicalize, CacheKeyGenerator, CacheKeyInput, KeyVersions};
pub use models::{
    CacheEntry, CacheStats, CacheStatus, CachedOutcome, Computed, OperationRequest,
    OperationTimings, OrchestratorConfig,
};
pub use orchestrator::CachedOperationOrchestrator;
