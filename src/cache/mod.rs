//! Read-path cache: TTL + strict LRU + byte budget per namespace, with
//! stale-while-revalidate semantics for idempotent GET responses.

mod entry;
mod key;
mod manager;
mod namespace;

pub use entry::{CacheSlot, CachedResponse};
pub use key::{canonicalize_url, CacheKey};
pub use manager::{
    CacheError, CacheEvent, CacheFetcher, CacheManager, FetchOutcome, FetchTransportError,
    DEFAULT_BLOCKLIST,
};
pub use namespace::CacheNamespace;
