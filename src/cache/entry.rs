//! Cache entry state machine.
//!
//! Mirrors the lifecycle the teacher's JWKS cache entry uses
//! (`Empty -> Loading -> Ready -> Refreshing -> Ready`), generalised from a
//! single per-provider slot to an arbitrary cached GET response. The state
//! transitions double as the single-flight guard: `begin_load`/
//! `begin_refresh` only succeed for the caller that actually owns the slot.

use std::time::{Duration, Instant};

/// A cached response body plus the metadata the cache needs to serve and
/// evict it.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub body: String,
    pub content_type: Option<String>,
    pub status: u16,
    pub etag: Option<String>,
    pub inserted_at: Instant,
    pub last_used_at: Instant,
    pub ttl: Duration,
    pub byte_size: usize,
}

impl CachedResponse {
    pub fn new(body: String, content_type: Option<String>, status: u16, etag: Option<String>, ttl: Duration, now: Instant) -> Self {
        let byte_size = body.len();
        Self { body, content_type, status, etag, inserted_at: now, last_used_at: now, ttl, byte_size }
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        now >= self.inserted_at + self.ttl
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_used_at = now;
    }
}

/// Per-key lifecycle, gating concurrent revalidation the same way the
/// teacher's `CacheEntry` gates concurrent JWKS refreshes.
#[derive(Debug, Clone, Default)]
pub enum CacheSlot {
    #[default]
    Empty,
    Loading,
    Ready(CachedResponse),
    Refreshing(CachedResponse),
}

impl CacheSlot {
    /// Attempt to claim this slot for an initial fetch. Returns `false` if
    /// another caller is already loading or a value is already present.
    pub fn begin_load(&mut self) -> bool {
        match self {
            CacheSlot::Empty => {
                *self = CacheSlot::Loading;
                true
            }
            _ => false,
        }
    }

    pub fn load_success(&mut self, response: CachedResponse) {
        *self = CacheSlot::Ready(response);
    }

    pub fn load_failure(&mut self) {
        *self = CacheSlot::Empty;
    }

    /// Attempt to claim this slot for a background revalidation. Returns
    /// `false` if a revalidation is already in flight.
    pub fn begin_refresh(&mut self) -> bool {
        match self {
            CacheSlot::Ready(response) => {
                *self = CacheSlot::Refreshing(response.clone());
                true
            }
            _ => false,
        }
    }

    pub fn refresh_success(&mut self, response: CachedResponse) {
        *self = CacheSlot::Ready(response);
    }

    /// A failed revalidation keeps serving the stale value rather than
    /// evicting it; only an explicit `invalidate` clears a `Ready` entry.
    pub fn refresh_failure(&mut self) {
        if let CacheSlot::Refreshing(response) = self {
            *self = CacheSlot::Ready(response.clone());
        }
    }

    pub fn invalidate(&mut self) {
        *self = CacheSlot::Empty;
    }

    pub fn response(&self) -> Option<&CachedResponse> {
        match self {
            CacheSlot::Ready(r) | CacheSlot::Refreshing(r) => Some(r),
            _ => None,
        }
    }

    pub fn response_mut(&mut self) -> Option<&mut CachedResponse> {
        match self {
            CacheSlot::Ready(r) | CacheSlot::Refreshing(r) => Some(r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(now: Instant, ttl: Duration) -> CachedResponse {
        CachedResponse::new("body".into(), Some("application/json".into()), 200, None, ttl, now)
    }

    #[test]
    fn begin_load_claims_empty_slot_once() {
        let mut slot = CacheSlot::Empty;
        assert!(slot.begin_load());
        assert!(!slot.begin_load());
    }

    #[test]
    fn load_success_moves_to_ready() {
        let mut slot = CacheSlot::Empty;
        slot.begin_load();
        let now = Instant::now();
        slot.load_success(sample(now, Duration::from_secs(60)));
        assert!(matches!(slot, CacheSlot::Ready(_)));
    }

    #[test]
    fn begin_refresh_requires_ready_state() {
        let mut slot = CacheSlot::Empty;
        assert!(!slot.begin_refresh());

        slot.begin_load();
        slot.load_success(sample(Instant::now(), Duration::from_secs(60)));
        assert!(slot.begin_refresh());
        assert!(!slot.begin_refresh());
    }

    #[test]
    fn stale_after_ttl_elapses() {
        let now = Instant::now();
        let response = sample(now, Duration::from_millis(0));
        assert!(response.is_stale(now + Duration::from_millis(1)));
    }

    #[test]
    fn refresh_failure_keeps_stale_value_available() {
        let mut slot = CacheSlot::Empty;
        slot.begin_load();
        slot.load_success(sample(Instant::now(), Duration::from_secs(60)));
        slot.begin_refresh();
        slot.refresh_failure();
        assert!(matches!(slot, CacheSlot::Ready(_)));
    }
}
