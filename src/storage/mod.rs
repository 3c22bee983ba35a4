//! Hybrid storage: primary/fallback routing with deferred write replay.
//!
//! # Submodules
//!
//! - `backend`: `StorageBackend` trait, command/reply types and the in-memory store.
//! - `health`: the primary's health record.
//! - `replay`: ordered queue of deferred writes.
//! - `gateway`: the router tying them together.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod backend;
pub mod gateway;
pub mod health;
pub mod replay;

pub use backend::{InMemoryStorage, StorageBackend, StorageCommand, StorageReply};
pub use gateway::{GatewayConfig, HybridStorageGateway};
pub use health::DependencyHealth;
pub use replay::{ReplayQueue, ReplayReport};
