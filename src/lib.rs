#![forbid(unsafe_code)]

//! # offline-core
//!
//! Offline-resilience primitives for a browser-resident reactive canvas app:
//! a network quality detector, a circuit breaker, a write-replay queue, a
//! stale-while-revalidate cache, a conflict resolution engine, and a
//! floating overlay controller, all built on the same small set of
//! resilience primitives (retry, timeout, bulkhead, circuit breaker).
//!
//! ## Layers
//!
//! - [`network`]: rolling-window reachability probing and link-quality
//!   classification (`Good`/`Degraded`/`Offline`).
//! - Resilience primitives ([`retry`], [`timeout`], [`bulkhead`],
//!   [`circuit_breaker`]), composable individually or via [`ResilienceStack`].
//! - [`queue`]: a FIFO-per-scope write replay queue that drains through the
//!   circuit breaker and hands conflicts off to the conflict engine.
//! - [`cache`]: single-flight, stale-while-revalidate response caching with
//!   strict per-namespace LRU eviction.
//! - [`conflict`]: three-way merge and user-resolution workflow for writes
//!   that raced a concurrent server change.
//! - [`overlay`]: a host-agnostic floating popup registry with dual
//!   screen/world coordinates.
//! - [`config`]: aggregated per-subsystem configuration and feature flags.
//! - [`telemetry`]: structured events ([`telemetry::events::CoreEvent`]) and
//!   sinks shared across every layer above.
//!
//! ## Quick Start
//!
//! ```rust
//! use offline_core::{Backoff, CircuitBreakerPolicy, Jitter, ResilienceError, RetryPolicy};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! async fn flaky_operation(
//!     attempts: Arc<AtomicUsize>,
//! ) -> Result<(), ResilienceError<std::io::Error>> {
//!     let n = attempts.fetch_add(1, Ordering::Relaxed);
//!     if n < 2 {
//!         Err(ResilienceError::Inner(std::io::Error::new(
//!             std::io::ErrorKind::Other,
//!             "transient failure",
//!         )))
//!     } else {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let attempts = Arc::new(AtomicUsize::new(0));
//!
//!     let retry = RetryPolicy::builder()
//!         .max_attempts(3)?
//!         .backoff(Backoff::exponential(Duration::from_millis(200)))
//!         .with_jitter(Jitter::full())
//!         .build();
//!     let breaker = CircuitBreakerPolicy::new(5, Duration::from_secs(30));
//!
//!     retry
//!         .execute(|| {
//!             let breaker = breaker.clone();
//!             let attempts = attempts.clone();
//!             async move { breaker.execute(|| flaky_operation(attempts.clone())).await }
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

mod backoff;
mod bulkhead;
mod circuit_breaker;
mod clock;
pub mod config;
mod error;
mod jitter;
mod resilience_error;
mod retry;
mod sleeper;
mod stack;
mod timeout;

pub mod cache;
pub mod conflict;
pub mod network;
pub mod overlay;
pub mod queue;
pub mod telemetry;

// Re-exports: resilience primitives, shared by every subsystem above.
pub use backoff::Backoff;
pub use bulkhead::BulkheadPolicy;
pub use circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState, CircuitTransition, FailureClass,
};
pub use clock::{Clock, MonotonicClock};
pub use error::{from_resilience_error, CoreError};
pub use jitter::Jitter;
pub use resilience_error::ResilienceError;
pub use retry::{BuildError, RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use stack::{ResilienceStack, ResilienceStackBuilder};
pub use timeout::{TimeoutError, TimeoutPolicy, MAX_TIMEOUT};

pub mod prelude;
