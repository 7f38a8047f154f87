//! Durable persistence abstraction shared by the write-replay queue and the
//! cache manager.
//!
//! The core never assumes a concrete storage backend; hosts swap in whatever
//! durable store fits their deployment (IndexedDB in a browser, Redis behind
//! a service, a file on disk). `KvStore` is the contract, the same role the
//! `Clock`/`Sleeper` traits play for time.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A durable key-value store with ordered range scans, keyed by `String` so
/// callers can encode composite keys (`auth_scope/operation_id`, namespaced
/// cache keys) as sortable strings.
#[async_trait]
pub trait KvStore: Send + Sync + std::fmt::Debug {
    async fn put(&self, key: String, value: Vec<u8>) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    /// Inclusive-lower, exclusive-upper scan over keys in lexicographic order.
    async fn range_scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;
}

/// Default in-process store; backs tests and hosts that persist elsewhere
/// (e.g. a browser host whose IndexedDB layer sits outside this crate).
#[derive(Debug, Default, Clone)]
pub struct MemoryKvStore {
    entries: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn put(&self, key: String, value: Vec<u8>) -> Result<(), StoreError> {
        self.entries.write().await.insert(key, value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn range_scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(feature = "redis-store")]
pub use redis_store::RedisKvStore;

#[cfg(feature = "redis-store")]
mod redis_store {
    use super::{KvStore, StoreError};
    use async_trait::async_trait;
    use redis::AsyncCommands;

    /// Redis-backed store, grounded on the same optional persistence path
    /// `hack-ink-jwks-cache`'s registry uses for snapshotting. Range scans use
    /// `SCAN` with a `prefix*` match pattern rather than `KEYS`, to avoid
    /// blocking the server on large keyspaces.
    #[derive(Debug, Clone)]
    pub struct RedisKvStore {
        client: redis::Client,
        namespace: String,
    }

    impl RedisKvStore {
        pub fn new(client: redis::Client, namespace: impl Into<String>) -> Self {
            Self { client, namespace: namespace.into() }
        }

        fn namespaced(&self, key: &str) -> String {
            format!("{}:{}", self.namespace, key)
        }
    }

    #[async_trait]
    impl KvStore for RedisKvStore {
        async fn put(&self, key: String, value: Vec<u8>) -> Result<(), StoreError> {
            let mut conn = self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            conn.set::<_, _, ()>(self.namespaced(&key), value)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))
        }

        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            let mut conn = self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            conn.get(self.namespaced(key)).await.map_err(|e| StoreError::Backend(e.to_string()))
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            let mut conn = self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            conn.del::<_, ()>(self.namespaced(key))
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))
        }

        async fn range_scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
            let mut conn = self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let pattern = format!("{}*", self.namespaced(prefix));
            let keys: Vec<String> =
                conn.scan_match(pattern).await.map_err(|e| StoreError::Backend(e.to_string()))?.collect();

            let mut out = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(value) = conn
                    .get::<_, Option<Vec<u8>>>(&key)
                    .await
                    .map_err(|e| StoreError::Backend(e.to_string()))?
                {
                    let stripped = key
                        .strip_prefix(&format!("{}:", self.namespace))
                        .unwrap_or(&key)
                        .to_string();
                    out.push((stripped, value));
                }
            }
            Ok(out)
        }
    }
}
