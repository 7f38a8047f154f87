//! Cache manager: TTL + strict LRU + byte budget, with stale-while-revalidate.
//!
//! Single-flight on initial load is the `CacheSlot` state machine itself
//! (holding the per-key lock across the fetch so concurrent callers queue up
//! behind it); background revalidation drops the lock before fetching so it
//! doesn't block readers that are happy with the stale value.

use super::entry::{CacheSlot, CachedResponse};
use super::key::CacheKey;
use super::namespace::CacheNamespace;
use crate::circuit_breaker::{CircuitBreakerPolicy, FailureClass};
use crate::queue::CacheInvalidationHook;
use crate::ResilienceError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex};

/// Endpoints that are never cached regardless of namespace: health probes,
/// telemetry ingestion, and auth endpoints.
pub const DEFAULT_BLOCKLIST: &[&str] = &["/health", "/telemetry", "/auth"];

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: u16,
    pub body: String,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    /// `true` if the response carried `Cache-Control: no-store`.
    pub no_store: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FetchTransportError {
    #[error("network error")]
    Network,
    #[error("timeout")]
    Timeout,
    #[error("server error")]
    ServerError,
}

/// Host collaborator that performs the actual network GET. Held as
/// `Arc<dyn CacheFetcher>` (not a plain closure) since a background
/// revalidation outlives the caller's stack frame.
#[async_trait]
pub trait CacheFetcher: Send + Sync {
    async fn fetch(&self) -> Result<FetchOutcome, FetchTransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("fetch failed: {0:?}")]
    Fetch(FetchTransportError),
    #[error("circuit breaker open, refusing to fetch")]
    CircuitOpen,
    #[error("unknown cache namespace: {0}")]
    UnknownNamespace(String),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Hit { namespace: &'static str },
    StaleHit { namespace: &'static str },
    Miss { namespace: &'static str },
    Evicted { namespace: &'static str, count: usize },
    Invalidated { namespace: &'static str },
    ScopePurged { auth_scope: String },
}

type SlotKey = (&'static str, CacheKey);

#[derive(Default)]
struct LruIndex {
    order: BTreeMap<u64, SlotKey>,
    seq_of: HashMap<SlotKey, u64>,
}

impl LruIndex {
    fn touch(&mut self, slot_key: SlotKey, seq: u64) {
        if let Some(old) = self.seq_of.insert(slot_key.clone(), seq) {
            self.order.remove(&old);
        }
        self.order.insert(seq, slot_key);
    }

    fn remove(&mut self, slot_key: &SlotKey) {
        if let Some(seq) = self.seq_of.remove(slot_key) {
            self.order.remove(&seq);
        }
    }

    fn oldest_in(&self, namespace: &'static str) -> Option<SlotKey> {
        self.order.values().find(|(ns, _)| *ns == namespace).cloned()
    }
}

/// Bounded, TTL'd, auth-scoped cache for idempotent GET reads.
#[derive(Clone)]
pub struct CacheManager {
    namespaces: Arc<HashMap<&'static str, CacheNamespace>>,
    slots: Arc<DashMap<SlotKey, Arc<Mutex<CacheSlot>>>>,
    bytes_used: Arc<DashMap<&'static str, AtomicUsize>>,
    /// Last known byte size per slot, tracked outside the slot's mutex so
    /// `invalidate` can account for a removed entry's size even when the
    /// slot's lock is held by an in-flight revalidation.
    slot_sizes: Arc<DashMap<SlotKey, usize>>,
    lru: Arc<Mutex<LruIndex>>,
    seq: Arc<AtomicU64>,
    breaker: CircuitBreakerPolicy,
    blocklist: Arc<Vec<String>>,
    events: broadcast::Sender<CacheEvent>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager").finish_non_exhaustive()
    }
}

impl CacheManager {
    pub fn new(namespaces: Vec<CacheNamespace>, breaker: CircuitBreakerPolicy) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            namespaces: Arc::new(namespaces.into_iter().map(|ns| (ns.name, ns)).collect()),
            slots: Arc::new(DashMap::new()),
            bytes_used: Arc::new(DashMap::new()),
            slot_sizes: Arc::new(DashMap::new()),
            lru: Arc::new(Mutex::new(LruIndex::default())),
            seq: Arc::new(AtomicU64::new(0)),
            breaker,
            blocklist: Arc::new(DEFAULT_BLOCKLIST.iter().map(|s| s.to_string()).collect()),
            events: tx,
        }
    }

    /// Default deployment: `documents` and `lists` namespaces, per §4.4.
    pub fn with_default_namespaces(breaker: CircuitBreakerPolicy) -> Self {
        Self::new(vec![CacheNamespace::documents(), CacheNamespace::lists()], breaker)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn is_blocklisted(&self, url: &str) -> bool {
        self.blocklist.iter().any(|p| url.contains(p.as_str()))
    }

    /// Stale-while-revalidate read. Fresh hits never touch the network;
    /// stale hits return immediately and kick a background revalidation;
    /// misses await `fetcher` directly.
    pub async fn get(
        &self,
        namespace: &'static str,
        key: CacheKey,
        fetcher: Arc<dyn CacheFetcher>,
    ) -> Result<CachedResponse, CacheError> {
        if !self.namespaces.contains_key(namespace) {
            return Err(CacheError::UnknownNamespace(namespace.to_string()));
        }
        if self.is_blocklisted(&key.url) {
            let outcome = self.fetch_through_breaker(&fetcher).await?;
            return Ok(CachedResponse::new(
                outcome.body,
                outcome.content_type,
                outcome.status,
                outcome.etag,
                self.namespaces[namespace].ttl,
                Instant::now(),
            ));
        }

        let slot_key: SlotKey = (namespace, key.clone());
        let slot =
            self.slots.entry(slot_key.clone()).or_insert_with(|| Arc::new(Mutex::new(CacheSlot::Empty))).clone();
        let mut guard = slot.lock().await;
        let now = Instant::now();

        match &mut *guard {
            CacheSlot::Ready(response) if !response.is_stale(now) => {
                response.touch(now);
                let out = response.clone();
                drop(guard);
                self.bump_lru(slot_key).await;
                let _ = self.events.send(CacheEvent::Hit { namespace });
                return Ok(out);
            }
            CacheSlot::Ready(_) => {
                let stale = guard.response().expect("matched Ready above").clone();
                if guard.begin_refresh() {
                    drop(guard);
                    self.spawn_revalidation(namespace, key, slot, fetcher);
                }
                let _ = self.events.send(CacheEvent::StaleHit { namespace });
                return Ok(stale);
            }
            CacheSlot::Refreshing(response) => {
                let out = response.clone();
                let _ = self.events.send(CacheEvent::StaleHit { namespace });
                return Ok(out);
            }
            CacheSlot::Loading => {
                // Another caller's initial load holds this lock for the
                // duration of its fetch; we only get here once it's done,
                // at which point the state has already moved on. Fall
                // through to treat it as a fresh miss.
            }
            CacheSlot::Empty => {
                guard.begin_load();
            }
        }

        let _ = self.events.send(CacheEvent::Miss { namespace });
        match self.fetch_through_breaker(&fetcher).await {
            Ok(outcome) if outcome.status == 200 && !outcome.no_store => {
                let response = CachedResponse::new(
                    outcome.body,
                    outcome.content_type,
                    outcome.status,
                    outcome.etag,
                    self.namespaces[namespace].ttl,
                    now,
                );
                guard.load_success(response.clone());
                drop(guard);
                self.bump_lru(slot_key.clone()).await;
                self.add_bytes(slot_key, response.byte_size);
                self.evict_until_within_budget(namespace).await;
                Ok(response)
            }
            Ok(outcome) => {
                guard.load_failure();
                Ok(CachedResponse::new(
                    outcome.body,
                    outcome.content_type,
                    outcome.status,
                    outcome.etag,
                    self.namespaces[namespace].ttl,
                    now,
                ))
            }
            Err(e) => {
                guard.load_failure();
                Err(e)
            }
        }
    }

    fn spawn_revalidation(
        &self,
        namespace: &'static str,
        key: CacheKey,
        slot: Arc<Mutex<CacheSlot>>,
        fetcher: Arc<dyn CacheFetcher>,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            let outcome = manager.fetch_through_breaker(&fetcher).await;
            let mut guard = slot.lock().await;
            match outcome {
                Ok(o) if o.status == 200 && !o.no_store => {
                    let old_size = guard.response().map(|r| r.byte_size).unwrap_or(0);
                    let response = CachedResponse::new(
                        o.body,
                        o.content_type,
                        o.status,
                        o.etag,
                        manager.namespaces[namespace].ttl,
                        Instant::now(),
                    );
                    let new_size = response.byte_size;
                    guard.refresh_success(response);
                    drop(guard);
                    manager.adjust_bytes((namespace, key.clone()), old_size, new_size);
                    manager.bump_lru((namespace, key)).await;
                    manager.evict_until_within_budget(namespace).await;
                }
                _ => guard.refresh_failure(),
            }
        });
    }

    async fn fetch_through_breaker(
        &self,
        fetcher: &Arc<dyn CacheFetcher>,
    ) -> Result<FetchOutcome, CacheError> {
        let fetcher = Arc::clone(fetcher);
        self.breaker
            .execute_classified(
                || {
                    let fetcher = Arc::clone(&fetcher);
                    async move { fetcher.fetch().await.map_err(ResilienceError::Inner) }
                },
                |err| match err {
                    ResilienceError::Inner(FetchTransportError::Network) => FailureClass::Network,
                    ResilienceError::Inner(FetchTransportError::Timeout) => FailureClass::Timeout,
                    ResilienceError::Inner(FetchTransportError::ServerError) => FailureClass::ServerError,
                    _ => FailureClass::Network,
                },
            )
            .await
            .map_err(|e| match e {
                ResilienceError::CircuitOpen { .. } => CacheError::CircuitOpen,
                ResilienceError::Inner(inner) => CacheError::Fetch(inner),
                _ => CacheError::CircuitOpen,
            })
    }

    async fn bump_lru(&self, slot_key: SlotKey) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.lru.lock().await.touch(slot_key, seq);
    }

    fn add_bytes(&self, slot_key: SlotKey, size: usize) {
        self.bytes_used.entry(slot_key.0).or_insert_with(|| AtomicUsize::new(0)).fetch_add(size, Ordering::Relaxed);
        self.slot_sizes.insert(slot_key, size);
    }

    fn adjust_bytes(&self, slot_key: SlotKey, old_size: usize, new_size: usize) {
        let counter = self.bytes_used.entry(slot_key.0).or_insert_with(|| AtomicUsize::new(0));
        counter.fetch_sub(old_size, Ordering::Relaxed);
        counter.fetch_add(new_size, Ordering::Relaxed);
        self.slot_sizes.insert(slot_key, new_size);
    }

    fn bytes_used(&self, namespace: &'static str) -> usize {
        self.bytes_used.get(namespace).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0)
    }

    /// Evict strict-LRU entries in `namespace` until its byte budget holds.
    async fn evict_until_within_budget(&self, namespace: &'static str) {
        let Some(ns_config) = self.namespaces.get(namespace) else { return };
        let mut evicted = 0usize;
        while self.bytes_used(namespace) > ns_config.budget_bytes {
            let victim = {
                let lru = self.lru.lock().await;
                lru.oldest_in(namespace)
            };
            let Some(victim) = victim else { break };
            self.remove_slot(&victim).await;
            evicted += 1;
        }
        if evicted > 0 {
            let _ = self.events.send(CacheEvent::Evicted { namespace, count: evicted });
        }
    }

    async fn remove_slot(&self, slot_key: &SlotKey) {
        self.lru.lock().await.remove(slot_key);
        if self.slots.remove(slot_key).is_some() {
            if let Some((_, size)) = self.slot_sizes.remove(slot_key) {
                let counter = self.bytes_used.entry(slot_key.0).or_insert_with(|| AtomicUsize::new(0));
                counter.fetch_sub(size, Ordering::Relaxed);
            }
        }
    }

    /// Bulk invalidation by predicate over `(namespace, key)`, e.g. after a
    /// successful replayed write drains.
    pub fn invalidate<P>(&self, predicate: P)
    where
        P: Fn(&'static str, &CacheKey) -> bool,
    {
        let victims: Vec<SlotKey> =
            self.slots.iter().map(|e| e.key().clone()).filter(|(ns, k)| predicate(ns, k)).collect();
        for (namespace, key) in victims {
            let slot_key = (namespace, key.clone());
            if let Some((_, slot)) = self.slots.remove(&slot_key) {
                // Account for the removed entry's size from the side-channel
                // tracker regardless of whether the lock below succeeds, so
                // a revalidation holding the lock across an await can't
                // leak `bytes_used` once the slot is gone from the map.
                if let Some((_, size)) = self.slot_sizes.remove(&slot_key) {
                    if let Some(counter) = self.bytes_used.get(namespace) {
                        counter.fetch_sub(size, Ordering::Relaxed);
                    }
                }
                if let Ok(mut guard) = slot.try_lock() {
                    guard.invalidate();
                }
            }
            let _ = self.events.send(CacheEvent::Invalidated { namespace });
        }
    }

    /// Full purge of everything cached on behalf of `auth_scope`, called on
    /// auth change.
    pub fn purge_scope(&self, auth_scope: &str) {
        self.invalidate(|_, key| key.auth_scope == auth_scope);
        let _ = self.events.send(CacheEvent::ScopePurged { auth_scope: auth_scope.to_string() });
    }
}

impl CacheInvalidationHook for CacheManager {
    fn invalidate(&self, auth_scope: &str, url: &str) {
        let Ok(canonical) = super::key::canonicalize_url(url) else { return };
        CacheManager::invalidate(self, |_, key| key.auth_scope == auth_scope && key.url == canonical);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::time::Duration;

    struct StaticFetcher {
        body: &'static str,
        calls: Arc<StdAtomicUsize>,
    }

    #[async_trait]
    impl CacheFetcher for StaticFetcher {
        async fn fetch(&self) -> Result<FetchOutcome, FetchTransportError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(FetchOutcome {
                status: 200,
                body: self.body.to_string(),
                content_type: Some("application/json".into()),
                etag: None,
                no_store: false,
            })
        }
    }

    fn breaker() -> CircuitBreakerPolicy {
        CircuitBreakerPolicy::new(3, Duration::from_secs(10))
    }

    #[tokio::test]
    async fn miss_then_hit_avoids_second_fetch() {
        let manager = CacheManager::new(
            vec![CacheNamespace::new("documents", Duration::from_secs(60), 1024)],
            breaker(),
        );
        let calls = Arc::new(StdAtomicUsize::new(0));
        let fetcher: Arc<dyn CacheFetcher> =
            Arc::new(StaticFetcher { body: "hello", calls: calls.clone() });
        let key = CacheKey::new("tenant-1", "https://api.example.com/doc/1").unwrap();

        manager.get("documents", key.clone(), fetcher.clone()).await.unwrap();
        manager.get("documents", key, fetcher).await.unwrap();

        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn budget_evicts_strict_lru() {
        let manager =
            CacheManager::new(vec![CacheNamespace::new("lists", Duration::from_secs(60), 10)], breaker());
        let calls = Arc::new(StdAtomicUsize::new(0));

        for i in 0..3 {
            let fetcher: Arc<dyn CacheFetcher> =
                Arc::new(StaticFetcher { body: "12345", calls: calls.clone() });
            let key =
                CacheKey::new("tenant-1", &format!("https://api.example.com/list/{i}")).unwrap();
            manager.get("lists", key, fetcher).await.unwrap();
        }

        assert!(manager.bytes_used("lists") <= 10);
    }

    #[tokio::test]
    async fn purge_scope_removes_only_that_scope() {
        let manager = CacheManager::new(
            vec![CacheNamespace::new("documents", Duration::from_secs(60), 1024)],
            breaker(),
        );
        let calls = Arc::new(StdAtomicUsize::new(0));
        let fetcher: Arc<dyn CacheFetcher> =
            Arc::new(StaticFetcher { body: "x", calls: calls.clone() });

        let key_a = CacheKey::new("tenant-a", "https://api.example.com/doc").unwrap();
        let key_b = CacheKey::new("tenant-b", "https://api.example.com/doc").unwrap();
        manager.get("documents", key_a.clone(), fetcher.clone()).await.unwrap();
        manager.get("documents", key_b.clone(), fetcher.clone()).await.unwrap();

        manager.purge_scope("tenant-a");

        assert!(!manager.slots.contains_key(&("documents", key_a)));
        assert!(manager.slots.contains_key(&("documents", key_b)));
    }

    #[tokio::test]
    async fn invalidate_accounts_for_size_even_when_slot_lock_is_held() {
        let manager = CacheManager::new(
            vec![CacheNamespace::new("documents", Duration::from_secs(60), 1024)],
            breaker(),
        );
        let calls = Arc::new(StdAtomicUsize::new(0));
        let fetcher: Arc<dyn CacheFetcher> =
            Arc::new(StaticFetcher { body: "hello", calls: calls.clone() });
        let key = CacheKey::new("tenant-1", "https://api.example.com/doc").unwrap();
        manager.get("documents", key.clone(), fetcher).await.unwrap();
        assert!(manager.bytes_used("documents") > 0);

        let slot = manager.slots.get(&("documents", key.clone())).unwrap().clone();
        let _guard = slot.lock().await;

        manager.invalidate(|_, k| k.auth_scope == "tenant-1");

        assert_eq!(manager.bytes_used("documents"), 0);
    }

    #[tokio::test]
    async fn blocklisted_path_bypasses_cache_entirely() {
        let manager = CacheManager::with_default_namespaces(breaker());
        let calls = Arc::new(StdAtomicUsize::new(0));
        let fetcher: Arc<dyn CacheFetcher> =
            Arc::new(StaticFetcher { body: "ok", calls: calls.clone() });
        let key = CacheKey::new("tenant-1", "https://api.example.com/health").unwrap();

        manager.get("documents", key.clone(), fetcher.clone()).await.unwrap();
        manager.get("documents", key, fetcher).await.unwrap();

        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }
}
