//! Crate-wide error type surfaced by the public subsystem APIs.
//!
//! Internal resilience primitives (retry, circuit breaker, bulkhead, timeout)
//! speak [`crate::ResilienceError`]; the subsystems that sit on top of them
//! (network detector, queue, cache, conflict engine, overlay) collapse that
//! plus their own failure modes into `CoreError` so callers outside this
//! crate deal with one error enum.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("operation timed out after {elapsed_ms}ms (limit {limit_ms}ms)")]
    Timeout { elapsed_ms: u64, limit_ms: u64 },

    #[error("circuit breaker open: {failure_count} consecutive failures, open for {open_ms}ms")]
    CircuitOpen { failure_count: usize, open_ms: u64 },

    #[error("write replay queue rejected operation: {reason}")]
    QueueRejected { reason: String },

    #[error("operation exceeded {max_attempts} replay attempts")]
    ReplayExhausted { max_attempts: u32 },

    #[error("cache entry exceeds namespace byte budget: {size} > {budget}")]
    CacheEntryTooLarge { size: usize, budget: usize },

    #[error("unknown cache namespace: {0}")]
    UnknownNamespace(String),

    #[error("conflict record {0} not found")]
    ConflictNotFound(uuid::Uuid),

    #[error("conflict {0} already resolved")]
    ConflictAlreadyResolved(uuid::Uuid),

    #[error("merge strategy failed: {0}")]
    MergeFailed(String),

    #[error("overlay capability not supported by active adapter: {0:?}")]
    CapabilityUnsupported(crate::overlay::Capability),

    #[error("no overlay adapter registered")]
    NoAdapterRegistered,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("storage backend error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Collapses a `ResilienceError<E>` into `CoreError`, given a way to convert
/// the wrapped inner error. Subsystems call this at their API boundary
/// rather than relying on a blanket generic impl, since `E` varies per call
/// site (`reqwest::Error` for network fetches, a storage error for the
/// queue, ...).
pub fn from_resilience_error<E>(
    err: crate::ResilienceError<E>,
    inner: impl FnOnce(E) -> CoreError,
) -> CoreError {
    match err {
        crate::ResilienceError::Timeout { elapsed, timeout } => CoreError::Timeout {
            elapsed_ms: elapsed.as_millis() as u64,
            limit_ms: timeout.as_millis() as u64,
        },
        crate::ResilienceError::Bulkhead { in_flight, max } => {
            CoreError::QueueRejected { reason: format!("{in_flight} in-flight, max {max}") }
        }
        crate::ResilienceError::CircuitOpen { failure_count, open_duration } => {
            CoreError::CircuitOpen { failure_count, open_ms: open_duration.as_millis() as u64 }
        }
        crate::ResilienceError::RetryExhausted { attempts, .. } => {
            CoreError::ReplayExhausted { max_attempts: attempts as u32 }
        }
        crate::ResilienceError::Inner(e) => inner(e),
    }
}

impl CoreError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CoreError::CircuitOpen { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CoreError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_open_message_includes_counts() {
        let err = CoreError::CircuitOpen { failure_count: 4, open_ms: 1200 };
        let msg = err.to_string();
        assert!(msg.contains('4'));
        assert!(msg.contains("1200"));
        assert!(err.is_circuit_open());
    }

    #[test]
    fn timeout_predicate() {
        let err = CoreError::Timeout { elapsed_ms: 10, limit_ms: 5 };
        assert!(err.is_timeout());
        assert!(!err.is_circuit_open());
    }
}
