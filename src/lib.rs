// resilience-core - Circuit breakers, deduplicating result cache and hybrid storage
// Author: kelexine (https://github.com/kelexine)

pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod metrics;
pub mod providers;
pub mod resilience;
pub mod storage;
pub mod utils;

pub use context::{ResilienceContext, ResilienceContextBuilder};
pub use error::{ResilienceError, Result};
