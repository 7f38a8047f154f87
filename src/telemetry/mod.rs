//! Structured telemetry shared across every subsystem.
//!
//! Events flow through `TelemetrySink` implementations which can log,
//! aggregate, or forward events to external systems.
//!
//! # Event types
//!
//! The resilience primitives emit the original four variants; each
//! higher-level subsystem wraps its own event type into [`events::CoreEvent`]
//! so one sink can observe the whole stack:
//!
//! - **Retry**: `RetryEvent`
//! - **Circuit Breaker**: `CircuitBreakerEvent`
//! - **Bulkhead**: `BulkheadEvent`
//! - **Timeout**: `TimeoutEvent`
//! - **Network/Queue/Cache/Conflict/Overlay**: `NetworkEvent`, `QueueEvent`,
//!   `CacheEvent`, `ConflictEvent`, `OverlayEvent`
//!
//! # Telemetry sinks
//!
//! The `TelemetrySink` trait defines how events are consumed. It's implemented
//! as a `tower::Service<CoreEvent>` for composability.

pub mod events;
pub mod sinks;

pub use events::{
    BulkheadEvent, CircuitBreakerEvent, CoreEvent, RequestOutcome, RetryEvent, TimeoutEvent,
};
pub use sinks::{
    emit_best_effort, ComposedSinkError, FallbackSink, LogSink, MemorySink, MulticastSink,
    NonBlockingSink, NullSink, StreamingSink, TelemetrySink,
};

#[cfg(test)]
mod tests {
    // Note: Tests have been moved to submodules (events.rs and sinks.rs)
}