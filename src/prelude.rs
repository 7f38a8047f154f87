//! Convenient re-exports for common offline-core types.
pub use crate::{
    backoff::Backoff,
    bulkhead::BulkheadPolicy,
    cache::{CacheError, CacheEvent, CacheFetcher, CacheManager},
    circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState, FailureClass},
    config::{FeatureFlags, OfflineFoundationConfig, OfflineFoundationConfigBuilder},
    conflict::{ConflictError, ConflictEvent, ConflictResolutionEngine, Resolution},
    jitter::Jitter,
    network::{NetworkDetector, NetworkDetectorConfig, NetworkEvent, Quality},
    overlay::{Capability, OverlayAdapter, OverlayController, OverlayEvent},
    queue::{
        Operation, OperationId, OperationStatus, QueueCommand, QueueCommandHandler,
        WriteReplayQueue,
    },
    retry::{BuildError, RetryPolicy, RetryPolicyBuilder},
    telemetry::{
        events::CoreEvent, FallbackSink, LogSink, MemorySink, MulticastSink, NullSink,
        StreamingSink, TelemetrySink,
    },
    timeout::{TimeoutError, TimeoutPolicy, MAX_TIMEOUT},
    CoreError, ResilienceError,
};
