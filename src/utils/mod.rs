//! Utility functions and helpers for the resilience core.
//!
//! This module provides cross-cutting concerns like structured logging,
//! secret redaction, and backoff-driven retry.
//!
//! # Submodules
//!
//! - `logging`: Tracing initialization and credential redaction.
//! - `retry`: Exponential backoff retry and provider retry-hint parsing.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod logging;
pub mod retry;
