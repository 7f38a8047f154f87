//! Conflict resolution engine: mediates write-write conflicts handed off by
//! the write replay queue.

use super::merge::{MergeOutcome, MergeStrategy, OrderedNodeListMerge};
use super::model::{ConflictRecord, ConflictStatus, Resolution};
use crate::cache::CacheManager;
use crate::queue::{
    ConflictHandoff, HttpMethod, KvStore, Operation, OperationId, OutgoingRequest, StoreError,
    WriteReplayQueue,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

/// Conflict record older than this with no user decision reverts to
/// `pending` with escalated backoff.
pub const CONFLICT_TIMEOUT_MS: u64 = 5 * 60 * 1000;
/// Past this many timeouts in a row the operation is dead-lettered rather
/// than kept in limbo forever.
pub const MAX_REPEAT_TIMEOUTS: u32 = 3;

/// How a re-submitted write tells the backend to bypass its own
/// optimistic-concurrency check. Pluggable since the backend contract is a
/// black box (per `OutgoingRequest`'s collaborator contract): the default
/// merges a `force` field into a JSON-object body; a header-based backend
/// can supply its own strategy instead.
pub trait ForceSaveStrategy: Send + Sync {
    fn apply(&self, body: &str) -> String;
}

/// Inserts `"force": true` into the body if it's a JSON object; otherwise
/// wraps the original value so the flag still has somewhere to live.
#[derive(Debug, Default, Clone, Copy)]
pub struct BodyFieldForceSave;

impl ForceSaveStrategy for BodyFieldForceSave {
    fn apply(&self, body: &str) -> String {
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(serde_json::Value::Object(mut map)) => {
                map.insert("force".to_string(), serde_json::Value::Bool(true));
                serde_json::to_string(&serde_json::Value::Object(map)).unwrap_or_else(|_| body.to_string())
            }
            Ok(other) => serde_json::json!({ "force": true, "value": other }).to_string(),
            Err(_) => body.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConflictError {
    #[error("no conflict record for operation {0}")]
    NotFound(OperationId),
    #[error("conflict is not awaiting a user decision")]
    NotAwaitingUser,
    #[error("merge was requested but is not computable: {0}")]
    NotComputable(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConflictEvent {
    Opened { operation_id: OperationId },
    Resolved { operation_id: OperationId, resolution: ResolutionKind },
    TimedOut { operation_id: OperationId, repeat_count: u32 },
    Abandoned { operation_id: OperationId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    KeptMine,
    UsedTheirs,
    Merged,
    ForceSaved,
}

fn key_for(id: OperationId) -> String {
    format!("conflict/{id}")
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

struct EngineInner {
    store: Arc<dyn KvStore>,
    queue: WriteReplayQueue,
    cache: Option<Arc<CacheManager>>,
    merge_strategy: Arc<dyn MergeStrategy>,
    force_save_strategy: Arc<dyn ForceSaveStrategy>,
    events: broadcast::Sender<ConflictEvent>,
    timeout_ms: u64,
    max_repeat_timeouts: u32,
}

/// Orchestrates 409 handling: persists conflict records, presents the four
/// resolution choices, and re-submits or discards the underlying operation.
#[derive(Clone)]
pub struct ConflictResolutionEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for ConflictResolutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolutionEngine").finish_non_exhaustive()
    }
}

impl ConflictResolutionEngine {
    pub fn new(store: Arc<dyn KvStore>, queue: WriteReplayQueue) -> Self {
        let (tx, _rx) = broadcast::channel(64);
        Self {
            inner: Arc::new(EngineInner {
                store,
                queue,
                cache: None,
                merge_strategy: Arc::new(OrderedNodeListMerge),
                force_save_strategy: Arc::new(BodyFieldForceSave),
                events: tx,
                timeout_ms: CONFLICT_TIMEOUT_MS,
                max_repeat_timeouts: MAX_REPEAT_TIMEOUTS,
            }),
        }
    }

    /// Overrides the timeout-sweep cadence and retry ceiling, per
    /// [`crate::config::ConflictConfig`].
    pub fn with_timeout_config(mut self, timeout_ms: u64, max_repeat_timeouts: u32) -> Self {
        let inner = Arc::get_mut(&mut self.inner).expect("no other clones yet");
        inner.timeout_ms = timeout_ms;
        inner.max_repeat_timeouts = max_repeat_timeouts;
        self
    }

    pub fn with_cache(store: Arc<dyn KvStore>, queue: WriteReplayQueue, cache: Arc<CacheManager>) -> Self {
        let mut engine = Self::new(store, queue);
        Arc::get_mut(&mut engine.inner).expect("no other clones yet").cache = Some(cache);
        engine
    }

    pub fn with_merge_strategy(mut self, strategy: Arc<dyn MergeStrategy>) -> Self {
        Arc::get_mut(&mut self.inner).expect("no other clones yet").merge_strategy = strategy;
        self
    }

    pub fn with_force_save_strategy(mut self, strategy: Arc<dyn ForceSaveStrategy>) -> Self {
        Arc::get_mut(&mut self.inner).expect("no other clones yet").force_save_strategy = strategy;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConflictEvent> {
        self.inner.events.subscribe()
    }

    async fn put_record(&self, record: &ConflictRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record).expect("ConflictRecord serializes");
        self.inner.store.put(key_for(record.operation_id), bytes).await
    }

    pub async fn get(&self, operation_id: OperationId) -> Result<Option<ConflictRecord>, StoreError> {
        match self.inner.store.get(&key_for(operation_id)).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Backend(format!("corrupt stored conflict record {operation_id}: {e}"))),
            None => Ok(None),
        }
    }

    pub async fn list_awaiting_user(&self) -> Result<Vec<ConflictRecord>, StoreError> {
        let entries = self.inner.store.range_scan("conflict/").await?;
        Ok(entries
            .into_iter()
            .filter_map(|(_, bytes)| serde_json::from_slice::<ConflictRecord>(&bytes).ok())
            .filter(|r| r.status == ConflictStatus::AwaitingUser)
            .collect())
    }

    /// Resolve an `awaiting_user` conflict. `merged_value` is only consulted
    /// for `Resolution::Merge`'s explicit override; pass `None` to run the
    /// configured merge strategy instead.
    pub async fn resolve(
        &self,
        operation_id: OperationId,
        resolution: Resolution,
        merged_value: Option<String>,
    ) -> Result<(), ConflictError> {
        let mut record = self.get(operation_id).await?.ok_or(ConflictError::NotFound(operation_id))?;
        if record.status != ConflictStatus::AwaitingUser {
            return Err(ConflictError::NotAwaitingUser);
        }
        let Some(op) = self.inner.queue.get(operation_id).await? else {
            return Err(ConflictError::NotFound(operation_id));
        };

        record.status = ConflictStatus::Resolving;
        self.put_record(&record).await?;

        let (kind, outcome) = match resolution {
            Resolution::KeepMine => {
                self.resubmit(&op, &record, record.mine_value.clone(), true).await?;
                (ResolutionKind::KeptMine, None)
            }
            Resolution::ForceSave => {
                self.resubmit(&op, &record, record.mine_value.clone(), true).await?;
                (ResolutionKind::ForceSaved, None)
            }
            Resolution::UseTheirs => {
                self.inner.queue.discard(operation_id).await?;
                (ResolutionKind::UsedTheirs, None)
            }
            Resolution::Merge => {
                let body = match merged_value {
                    Some(explicit) => explicit,
                    None => {
                        let base = record.base_version.clone().unwrap_or_default();
                        let theirs = record.theirs_value.clone().unwrap_or_default();
                        match self.inner.merge_strategy.merge(&base, &record.mine_value, &theirs) {
                            MergeOutcome::Merged(body) => body,
                            MergeOutcome::NotComputable { reason, .. } => {
                                record.status = ConflictStatus::AwaitingUser;
                                self.put_record(&record).await?;
                                return Err(ConflictError::NotComputable(reason));
                            }
                        }
                    }
                };
                self.resubmit(&op, &record, body, false).await?;
                (ResolutionKind::Merged, None)
            }
        };
        let _ = outcome;

        record.status = ConflictStatus::Resolved;
        self.put_record(&record).await?;
        if let Some(cache) = &self.inner.cache {
            cache.invalidate(|_, key| key.auth_scope == op.auth_scope && key.url.starts_with(&base_path(&op.url)));
        }
        let _ = self.inner.events.send(ConflictEvent::Resolved { operation_id, resolution: kind });
        Ok(())
    }

    /// Resubmits `body` against the backend. `force` applies the
    /// force-save indicator to bypass the backend's optimistic-concurrency
    /// check (`keep_mine`/`force_save` only); a `merge` resubmission sends
    /// the merged value unforced so an independent write landing in the
    /// meantime still surfaces as a new conflict.
    async fn resubmit(
        &self,
        op: &Operation,
        record: &ConflictRecord,
        body: String,
        force: bool,
    ) -> Result<(), ConflictError> {
        let body = if force { self.inner.force_save_strategy.apply(&body) } else { body };
        let req = OutgoingRequest {
            method: op.method,
            url: op.url.clone(),
            body,
            headers: op.headers.clone(),
            auth_scope: op.auth_scope.clone(),
            base_version: record.current_version.clone().or_else(|| record.base_version.clone()),
        };
        self.inner.queue.discard(op.id).await?;
        self.inner.queue.enqueue(req).await?;
        Ok(())
    }

    /// Sweep `awaiting_user` records older than `CONFLICT_TIMEOUT_MS`,
    /// reverting them to `pending` with escalated backoff; records that
    /// have already timed out `MAX_REPEAT_TIMEOUTS` times are abandoned and
    /// their operation dead-lettered.
    pub async fn sweep_timeouts(&self) -> Result<usize, StoreError> {
        let now = now_millis();
        let mut swept = 0;
        for mut record in self.list_awaiting_user().await? {
            if now.saturating_sub(record.created_at_ms) < self.inner.timeout_ms {
                continue;
            }
            record.repeat_count += 1;
            swept += 1;

            if record.repeat_count >= self.inner.max_repeat_timeouts {
                record.status = ConflictStatus::Abandoned;
                self.put_record(&record).await?;
                self.inner.queue.mark_dead_letter(record.operation_id, "conflict-timeout-exhausted").await?;
                let _ = self.inner.events.send(ConflictEvent::Abandoned { operation_id: record.operation_id });
            } else {
                self.put_record(&record).await?;
                self.inner
                    .queue
                    .requeue_with_escalated_backoff(record.operation_id, record.repeat_count)
                    .await?;
                let _ = self.inner.events.send(ConflictEvent::TimedOut {
                    operation_id: record.operation_id,
                    repeat_count: record.repeat_count,
                });
            }
        }
        Ok(swept)
    }
}

/// Strips the final path segment so a resolved document conflict also
/// invalidates the list view it belongs to.
fn base_path(url: &str) -> String {
    match url.rfind('/') {
        Some(idx) => url[..idx].to_string(),
        None => url.to_string(),
    }
}

#[async_trait::async_trait]
impl ConflictHandoffAsync for ConflictResolutionEngine {
    async fn handle(&self, op: Operation, current_version: Option<String>, current_value: Option<String>) {
        let record = ConflictRecord::new(op.id, op.base_version.clone(), current_version, op.body.clone(), current_value, now_millis());
        if self.put_record(&record).await.is_ok() {
            let _ = self.inner.events.send(ConflictEvent::Opened { operation_id: op.id });
        }
    }
}

/// `ConflictHandoff` is a synchronous trait (the queue calls it from inside
/// a lock-held section), but recording a conflict needs an async store
/// write; bridge the two by spawning the async half.
#[async_trait::async_trait]
pub trait ConflictHandoffAsync: Send + Sync {
    async fn handle(&self, op: Operation, current_version: Option<String>, current_value: Option<String>);
}

impl ConflictHandoff for ConflictResolutionEngine {
    fn on_conflict(&self, op: Operation, current_version: Option<String>, current_value: Option<String>) {
        let engine = self.clone();
        tokio::spawn(async move {
            ConflictHandoffAsync::handle(&engine, op, current_version, current_value).await;
        });
    }
}
