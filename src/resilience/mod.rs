//! Failure isolation for unreliable dependencies.
//!
//! # Data Flow
//! ```text
//! Call to a provider or store:
//!     → manager.rs (look up the breaker registered for the dependency name)
//!     → circuit_breaker.rs (reject fast while open, otherwise run and record)
//! ```
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod circuit_breaker;
pub mod manager;

pub use circuit_breaker::{
    BreakerStatus, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
    ExecutionResult,
};
pub use manager::CircuitBreakerManager;
