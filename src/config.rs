//! Aggregated configuration for the whole offline foundation.
//!
//! Each subsystem already owns a `Default`-implementing config struct
//! (`NetworkDetectorConfig`, `QueueConfig`, `CircuitBreakerConfig`, ...);
//! this module just bundles them for callers who want to construct the
//! whole stack from one object, plus the feature-flag surface the host
//! reads to decide which of these subsystems are switched on.

use crate::cache::CacheNamespace;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::network::NetworkDetectorConfig;
use crate::queue::QueueConfig;
use std::time::Duration;

/// Plain read-only flags the host passes in; this crate never persists or
/// distributes them, it only reacts to their current values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// `offline.circuitBreaker` — gate write-replay draining on breaker state.
    pub circuit_breaker: bool,
    /// `offline.swCaching` — enable the stale-while-revalidate response cache.
    pub sw_caching: bool,
    /// `offline.conflictUI` — surface `AwaitingUser` conflicts instead of
    /// auto-resolving them with the last-write-wins default.
    pub conflict_ui: bool,
    /// `overlay.independentFromCanvas` — run the overlay controller off its
    /// own transform feed rather than piggybacking on the host canvas loop.
    pub overlay_independent_from_canvas: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            circuit_breaker: true,
            sw_caching: true,
            conflict_ui: true,
            overlay_independent_from_canvas: true,
        }
    }
}

/// Cache budget and namespace sizing, independent of `cache::CacheNamespace`
/// construction so it can be tuned without touching namespace wiring.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub documents_budget_bytes: usize,
    pub lists_budget_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { documents_budget_bytes: 50 * 1024 * 1024, lists_budget_bytes: 15 * 1024 * 1024 }
    }
}

impl CacheConfig {
    /// Builds the `documents`/`lists` namespaces `CacheManager::new` expects,
    /// carrying this config's budgets forward but keeping each namespace's
    /// own default TTL.
    pub fn to_namespaces(self) -> Vec<CacheNamespace> {
        vec![
            CacheNamespace::new(
                "documents",
                CacheNamespace::documents().ttl,
                self.documents_budget_bytes,
            ),
            CacheNamespace::new("lists", CacheNamespace::lists().ttl, self.lists_budget_bytes),
        ]
    }
}

/// Timeout-sweep cadence and retry ceiling for the conflict engine.
#[derive(Debug, Clone, Copy)]
pub struct ConflictConfig {
    pub timeout_ms: u64,
    pub max_repeat_timeouts: u32,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            timeout_ms: crate::conflict::CONFLICT_TIMEOUT_MS,
            max_repeat_timeouts: crate::conflict::MAX_REPEAT_TIMEOUTS,
        }
    }
}

/// Drift tolerance for popup/transform reconciliation.
#[derive(Debug, Clone, Copy)]
pub struct OverlayConfig {
    pub drift_tolerance_px: f64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self { drift_tolerance_px: crate::overlay::DRIFT_TOLERANCE_PX }
    }
}

/// One object aggregating every subsystem's config, for callers who'd
/// rather construct the whole stack from a single value than thread each
/// piece through separately.
#[derive(Debug, Clone)]
pub struct OfflineFoundationConfig {
    pub flags: FeatureFlags,
    pub network: NetworkDetectorConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub queue: QueueConfig,
    pub cache: CacheConfig,
    pub conflict: ConflictConfig,
    pub overlay: OverlayConfig,
}

impl Default for OfflineFoundationConfig {
    fn default() -> Self {
        Self {
            flags: FeatureFlags::default(),
            network: NetworkDetectorConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            queue: QueueConfig::default(),
            cache: CacheConfig::default(),
            conflict: ConflictConfig::default(),
            overlay: OverlayConfig::default(),
        }
    }
}

/// Builder mirroring `ResilienceStackBuilder`'s style: start from defaults,
/// override only what the caller cares about.
#[derive(Debug, Clone, Default)]
pub struct OfflineFoundationConfigBuilder {
    config: OfflineFoundationConfig,
}

impl OfflineFoundationConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(mut self, flags: FeatureFlags) -> Self {
        self.config.flags = flags;
        self
    }

    pub fn network(mut self, network: NetworkDetectorConfig) -> Self {
        self.config.network = network;
        self
    }

    pub fn circuit_breaker(mut self, failure_threshold: usize, recovery_timeout: Duration) -> Self {
        self.config.circuit_breaker = CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout,
            ..self.config.circuit_breaker
        };
        self
    }

    pub fn queue(mut self, queue: QueueConfig) -> Self {
        self.config.queue = queue;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    pub fn conflict(mut self, conflict: ConflictConfig) -> Self {
        self.config.conflict = conflict;
        self
    }

    pub fn overlay(mut self, overlay: OverlayConfig) -> Self {
        self.config.overlay = overlay;
        self
    }

    pub fn build(self) -> OfflineFoundationConfig {
        self.config
    }
}
