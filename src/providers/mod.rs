//! Inference provider abstraction and priority-ordered failover.
//!
//! Every provider call goes through the circuit breaker registered under the
//! provider's name. The chain walks providers in their configured priority
//! order and returns the first success, so an open breaker or a failing
//! provider costs one hop instead of a failed request.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::cache::Computed;
use crate::error::{ResilienceError, Result};
use crate::resilience::{CircuitBreakerError, CircuitBreakerManager};
use crate::utils::logging::redact_secrets;
use crate::utils::retry::{is_retryable, parse_retry_delay};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure reported by a provider client.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("failed: {0}")]
    Failed(String),
}

impl ProviderError {
    /// Classify an HTTP-like status and response body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = redact_secrets(body);
        match status {
            429 => ProviderError::RateLimited {
                retry_after: parse_retry_delay(body),
                message,
            },
            s if is_retryable(s) => ProviderError::Unavailable(format!("HTTP {}: {}", s, message)),
            s => ProviderError::Failed(format!("HTTP {}: {}", s, message)),
        }
    }

    /// Convert into the caller-facing taxonomy.
    pub fn into_resilience_error(self, provider: &str) -> ResilienceError {
        match self {
            ProviderError::RateLimited { retry_after, .. } => ResilienceError::RateLimited {
                provider: provider.to_string(),
                retry_after,
            },
            ProviderError::Unavailable(message) | ProviderError::Failed(message) => {
                ResilienceError::ComputeFailed {
                    provider: provider.to_string(),
                    message,
                }
            }
        }
    }
}

/// A named inference backend (OpenAI, Anthropic, Gemini, a local model, ...).
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(
        &self,
        operation: &str,
        payload: &Value,
    ) -> std::result::Result<Value, ProviderError>;
}

/// Providers in fixed priority order, each guarded by its own breaker.
#[derive(Clone)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn InferenceProvider>>,
    breakers: Arc<CircuitBreakerManager>,
}

impl ProviderChain {
    pub fn new(breakers: Arc<CircuitBreakerManager>) -> Self {
        Self {
            providers: Vec::new(),
            breakers,
        }
    }

    /// Append a provider at the lowest priority so far.
    pub fn with_provider(mut self, provider: Arc<dyn InferenceProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Invoke providers in priority order until one succeeds.
    pub async fn invoke(&self, operation: &str, payload: &Value) -> Result<Computed<Value>> {
        if self.providers.is_empty() {
            return Err(ResilienceError::InvalidInput(
                "no inference providers configured".to_string(),
            ));
        }

        let mut attempts = Vec::with_capacity(self.providers.len());
        let mut last_error = None;

        for provider in &self.providers {
            let name = provider.name();
            let breaker = self.breakers.get_breaker(name, None);
            attempts.push(name.to_string());

            let outcome = breaker
                .execute(|| provider.invoke(operation, payload))
                .await;

            match outcome.result {
                Ok(value) => {
                    debug!(
                        provider = name,
                        operation,
                        response_ms = outcome.response_time.as_millis() as u64,
                        "Provider call succeeded"
                    );
                    return Ok(Computed {
                        provider: name.to_string(),
                        value,
                    });
                }
                Err(CircuitBreakerError::Open {
                    name: dependency,
                    retry_in,
                }) => {
                    debug!(
                        provider = name,
                        retry_in_ms = retry_in.as_millis() as u64,
                        "Skipping provider with open circuit"
                    );
                    last_error = Some(ResilienceError::DependencyUnavailable {
                        dependency,
                        retry_in,
                    });
                }
                Err(CircuitBreakerError::Operation(e)) => {
                    warn!(provider = name, operation, "Provider call failed: {}", e);
                    last_error = Some(e.into_resilience_error(name));
                }
            }
        }

        let last = last_error.unwrap_or_else(|| {
            ResilienceError::Internal("provider chain ended without an outcome".to_string())
        });
        Err(ResilienceError::ProvidersExhausted {
            operation: operation.to_string(),
            attempts,
            last: Box::new(last),
        })
    }
}
