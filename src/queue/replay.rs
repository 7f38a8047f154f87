//! Write replay queue: durable at-least-once delivery of mutations.

use super::model::{now_millis, Operation, OperationId, OperationStatus};
use super::store::{KvStore, StoreError};
use crate::circuit_breaker::{CircuitBreakerPolicy, FailureClass};
use crate::network::{NetworkDetector, Quality};
use crate::ResilienceError;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, Notify};

/// Default cap on entries attempted in a single `drain()`.
pub const MAX_BATCH: usize = 25;
/// Default attempts before an operation is dead-lettered.
pub const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct MutationResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationTransportError {
    Network,
    Timeout,
}

/// Host collaborator that actually performs the HTTP mutation. Kept as a
/// trait so the core never hard-codes a wire protocol, per the external
/// interfaces contract.
#[async_trait]
pub trait MutationClient: Send + Sync + std::fmt::Debug {
    async fn send(
        &self,
        op: &Operation,
        idempotency_key: OperationId,
        idempotency_header: &str,
    ) -> Result<MutationResponse, MutationTransportError>;
}

/// The classified outcome of one delivery attempt, used to route the
/// response through the circuit breaker without the breaker knowing
/// anything about HTTP status codes. Only `Transport` and `Retryable`
/// count toward the breaker's failure tally; `Conflict` and `ClientFatal`
/// are business-logic outcomes, not backend-health signals.
#[derive(Debug, Clone)]
enum SendFailure {
    Conflict(MutationResponse),
    ClientFatal(MutationResponse),
    Retryable(MutationResponse),
    Transport(MutationTransportError),
}

impl fmt::Display for SendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendFailure::Conflict(resp) => write!(f, "conflict ({})", resp.status),
            SendFailure::ClientFatal(resp) => write!(f, "client error ({})", resp.status),
            SendFailure::Retryable(resp) => write!(f, "retryable server error ({})", resp.status),
            SendFailure::Transport(e) => write!(f, "transport error ({e:?})"),
        }
    }
}

impl std::error::Error for SendFailure {}

fn classify_send_failure(err: &ResilienceError<SendFailure>) -> FailureClass {
    match err {
        ResilienceError::Inner(SendFailure::Conflict(_)) => FailureClass::Conflict,
        ResilienceError::Inner(SendFailure::ClientFatal(_)) => FailureClass::ClientError,
        ResilienceError::Inner(SendFailure::Retryable(resp)) if resp.status == 429 => {
            FailureClass::TooManyRequests
        }
        ResilienceError::Inner(SendFailure::Retryable(_)) => FailureClass::ServerError,
        ResilienceError::Inner(SendFailure::Transport(MutationTransportError::Network)) => {
            FailureClass::Network
        }
        ResilienceError::Inner(SendFailure::Transport(MutationTransportError::Timeout)) => {
            FailureClass::Timeout
        }
        // Timeout/Bulkhead/RetryExhausted/CircuitOpen never surface here: this
        // classifier only ever sees what `send_through_breaker`'s own
        // operation closure can return.
        _ => FailureClass::Network,
    }
}

/// Notified when a replayed write comes back 409, so the conflict engine can
/// take over without the queue knowing its internals.
pub trait ConflictHandoff: Send + Sync {
    fn on_conflict(&self, op: Operation, current_version: Option<String>, current_value: Option<String>);
}

/// Notified on successful replay, so cache entries touched by the write can
/// be invalidated without the queue depending on the cache module directly.
pub trait CacheInvalidationHook: Send + Sync {
    fn invalidate(&self, auth_scope: &str, url: &str);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub processed: usize,
    pub failed: usize,
    pub conflicted: usize,
    pub dead_lettered: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Enqueued { id: OperationId, auth_scope: String },
    Done { id: OperationId },
    Conflicted { id: OperationId },
    Retrying { id: OperationId, attempts: u32, next_attempt_at_ms: u64 },
    DeadLettered { id: OperationId },
    DrainCompleted(DrainReport),
}

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub max_batch: usize,
    pub max_attempts: u32,
    pub max_cross_scope_concurrency: usize,
    pub idempotency_header: &'static str,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_batch: MAX_BATCH,
            max_attempts: MAX_ATTEMPTS,
            max_cross_scope_concurrency: 8,
            idempotency_header: "Idempotency-Key",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConflictPayload {
    pub current_version: Option<String>,
    pub current_value: Option<String>,
}

struct QueueInner {
    store: Arc<dyn KvStore>,
    breaker: CircuitBreakerPolicy,
    detector: NetworkDetector,
    client: Arc<dyn MutationClient>,
    config: QueueConfig,
    notify: Notify,
    draining: AtomicBool,
    events: broadcast::Sender<QueueEvent>,
    conflict_handoff: Mutex<Option<Arc<dyn ConflictHandoff>>>,
    cache_hook: Mutex<Option<Arc<dyn CacheInvalidationHook>>>,
}

/// Durable, ordered mutation queue that replays against the backend once the
/// circuit breaker and network detector agree it's safe to do so.
#[derive(Clone)]
pub struct WriteReplayQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for WriteReplayQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteReplayQueue").finish_non_exhaustive()
    }
}

impl WriteReplayQueue {
    pub fn new(
        store: Arc<dyn KvStore>,
        breaker: CircuitBreakerPolicy,
        detector: NetworkDetector,
        client: Arc<dyn MutationClient>,
        config: QueueConfig,
    ) -> Self {
        let (tx, _rx) = broadcast::channel(128);
        Self {
            inner: Arc::new(QueueInner {
                store,
                breaker,
                detector,
                client,
                config,
                notify: Notify::new(),
                draining: AtomicBool::new(false),
                events: tx,
                conflict_handoff: Mutex::new(None),
                cache_hook: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    pub async fn set_conflict_handoff(&self, handoff: Arc<dyn ConflictHandoff>) {
        *self.inner.conflict_handoff.lock().await = Some(handoff);
    }

    pub async fn set_cache_hook(&self, hook: Arc<dyn CacheInvalidationHook>) {
        *self.inner.cache_hook.lock().await = Some(hook);
    }

    /// Wake the replay worker; multiple concurrent calls coalesce into one
    /// in-flight `drain()`.
    pub fn request_sync(&self) {
        self.inner.notify.notify_one();
    }

    /// Run the background replay loop until the cancellation token fires.
    pub async fn run(&self, cancel: tokio_util::sync::CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = self.inner.notify.notified() => {
                    self.drain().await;
                }
            }
        }
    }

    fn key_for(id: OperationId) -> String {
        format!("queue/{id}")
    }

    pub async fn enqueue(&self, req: super::model::OutgoingRequest) -> Result<OperationId, StoreError> {
        let op = Operation::new(req, now_millis());
        let id = op.id;
        let scope = op.auth_scope.clone();
        let bytes = serde_json::to_vec(&op).expect("Operation serializes");
        self.inner.store.put(Self::key_for(id), bytes).await?;
        let _ = self.inner.events.send(QueueEvent::Enqueued { id, auth_scope: scope });
        self.request_sync();
        Ok(id)
    }

    pub async fn get(&self, id: OperationId) -> Result<Option<Operation>, StoreError> {
        match self.inner.store.get(&Self::key_for(id)).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Backend(format!("corrupt stored operation {id}: {e}"))),
            None => Ok(None),
        }
    }

    async fn put_operation(&self, op: &Operation) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(op).expect("Operation serializes");
        self.inner.store.put(Self::key_for(op.id), bytes).await
    }

    pub async fn list(&self, filter: Option<OperationStatus>) -> Result<Vec<Operation>, StoreError> {
        let entries = self.inner.store.range_scan("queue/").await?;
        let mut ops: Vec<Operation> = entries
            .into_iter()
            .filter_map(|(_, bytes)| serde_json::from_slice(&bytes).ok())
            .collect();
        if let Some(status) = filter {
            ops.retain(|op| op.status == status);
        }
        Ok(ops)
    }

    pub async fn requeue(&self, id: OperationId) -> Result<(), StoreError> {
        if let Some(mut op) = self.get(id).await? {
            op.status = OperationStatus::Pending;
            op.attempts = 0;
            op.next_attempt_at_ms = now_millis();
            self.put_operation(&op).await?;
            self.request_sync();
        }
        Ok(())
    }

    /// Like `requeue`, but escalates `attempts` instead of resetting it, so
    /// the backoff grows. Used when a conflict record times out without a
    /// user decision: the operation goes back to `pending`, but more slowly
    /// each time it happens again.
    pub async fn requeue_with_escalated_backoff(&self, id: OperationId, attempts: u32) -> Result<(), StoreError> {
        if let Some(mut op) = self.get(id).await? {
            op.status = OperationStatus::Pending;
            op.attempts = attempts;
            op.next_attempt_at_ms = now_millis() + backoff_with_full_jitter(attempts.max(1));
            self.put_operation(&op).await?;
            self.request_sync();
        }
        Ok(())
    }

    pub async fn discard(&self, id: OperationId) -> Result<(), StoreError> {
        self.inner.store.delete(&Self::key_for(id)).await
    }

    /// Escalate an operation straight to `dead_letter`, bypassing the normal
    /// attempt-count path. Used by the conflict resolution engine when a
    /// conflict record times out repeatedly without a user decision.
    pub async fn mark_dead_letter(&self, id: OperationId, reason: &str) -> Result<(), StoreError> {
        if let Some(mut op) = self.get(id).await? {
            op.status = OperationStatus::DeadLetter;
            op.last_error = Some(reason.to_string());
            self.put_operation(&op).await?;
            let _ = self.inner.events.send(QueueEvent::DeadLettered { id });
        }
        Ok(())
    }

    /// Attempt one batch, per `spec.md` §4.3's seven-step algorithm. Safe to
    /// call when offline; returns an all-zero report if the breaker or
    /// detector disallow traffic, or if a drain is already in flight.
    pub async fn drain(&self) -> DrainReport {
        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return DrainReport::default();
        }
        let report = self.drain_inner().await;
        self.inner.draining.store(false, Ordering::Release);
        let _ = self.inner.events.send(QueueEvent::DrainCompleted(report));
        report
    }

    async fn drain_inner(&self) -> DrainReport {
        if self.inner.breaker.state() != crate::circuit_breaker::CircuitState::Closed
            && self.inner.breaker.state() != crate::circuit_breaker::CircuitState::HalfOpen
        {
            return DrainReport::default();
        }
        if self.inner.detector.current_quality() == Quality::Offline {
            return DrainReport::default();
        }

        let now = now_millis();
        let pending = match self.list(Some(OperationStatus::Pending)).await {
            Ok(ops) => ops,
            Err(_) => return DrainReport::default(),
        };

        let mut due: Vec<Operation> =
            pending.into_iter().filter(|op| op.next_attempt_at_ms <= now).collect();
        due.sort_by_key(|op| (op.next_attempt_at_ms, op.enqueued_at_ms));
        due.truncate(self.inner.config.max_batch);

        let mut by_scope: HashMap<String, Vec<Operation>> = HashMap::new();
        for op in due {
            by_scope.entry(op.auth_scope.clone()).or_default().push(op);
        }

        // Cross-scope concurrency is bounded; within a scope, delivery is
        // strictly sequential (drain_scope_chain awaits each entry before
        // starting the next), which is what gives the FIFO-per-scope
        // guarantee.
        let reports: Vec<DrainReport> = stream::iter(by_scope.into_values())
            .map(|chain| self.drain_scope_chain(chain))
            .buffer_unordered(self.inner.config.max_cross_scope_concurrency)
            .collect()
            .await;

        reports.into_iter().fold(DrainReport::default(), |mut acc, r| {
            acc.processed += r.processed;
            acc.failed += r.failed;
            acc.conflicted += r.conflicted;
            acc.dead_lettered += r.dead_lettered;
            acc
        })
    }

    /// Deliver one `auth_scope`'s due entries strictly in order; entry k+1
    /// only starts after entry k reaches a terminal status, which is what
    /// gives the FIFO-per-scope guarantee.
    async fn drain_scope_chain(&self, chain: Vec<Operation>) -> DrainReport {
        let mut report = DrainReport::default();
        for mut op in chain {
            op.status = OperationStatus::InFlight;
            if self.put_operation(&op).await.is_err() {
                continue;
            }

            let outcome = self
                .inner
                .breaker
                .execute_classified(
                    || async {
                        let header = self.inner.config.idempotency_header;
                        match self.inner.client.send(&op, op.id, header).await {
                            Ok(resp) if (200..300).contains(&resp.status) => Ok(resp),
                            Ok(resp) if resp.status == 409 => {
                                Err(ResilienceError::Inner(SendFailure::Conflict(resp)))
                            }
                            Ok(resp) if resp.status == 429 || resp.status >= 500 => {
                                Err(ResilienceError::Inner(SendFailure::Retryable(resp)))
                            }
                            Ok(resp) => Err(ResilienceError::Inner(SendFailure::ClientFatal(resp))),
                            Err(transport) => {
                                Err(ResilienceError::Inner(SendFailure::Transport(transport)))
                            }
                        }
                    },
                    classify_send_failure,
                )
                .await;

            match outcome {
                Ok(resp) => {
                    op.status = OperationStatus::Done;
                    op.last_status_code = Some(resp.status);
                    let _ = self.put_operation(&op).await;
                    report.processed += 1;
                    let _ = self.inner.events.send(QueueEvent::Done { id: op.id });
                    if let Some(hook) = self.inner.cache_hook.lock().await.clone() {
                        hook.invalidate(&op.auth_scope, &op.url);
                    }
                }
                Err(ResilienceError::Inner(SendFailure::Conflict(resp))) => {
                    op.status = OperationStatus::Conflict;
                    let payload: ConflictPayload = serde_json::from_str(&resp.body).unwrap_or(
                        ConflictPayload { current_version: None, current_value: None },
                    );
                    let _ = self.put_operation(&op).await;
                    report.conflicted += 1;
                    let _ = self.inner.events.send(QueueEvent::Conflicted { id: op.id });
                    if let Some(handoff) = self.inner.conflict_handoff.lock().await.clone() {
                        handoff.on_conflict(op.clone(), payload.current_version, payload.current_value);
                    }
                }
                Err(ResilienceError::Inner(SendFailure::ClientFatal(resp))) => {
                    op.status = OperationStatus::DeadLetter;
                    op.attempts += 1;
                    op.last_status_code = Some(resp.status);
                    op.last_error = Some("client-fatal".into());
                    let _ = self.put_operation(&op).await;
                    report.dead_lettered += 1;
                    let _ = self.inner.events.send(QueueEvent::DeadLettered { id: op.id });
                }
                Err(ResilienceError::Inner(SendFailure::Retryable(resp))) => {
                    self.schedule_retry(&mut op, Some(resp.status), "server-retryable").await;
                    report.failed += 1;
                    self.emit_retry_or_dead_letter(&op, &mut report);
                }
                Err(ResilienceError::Inner(SendFailure::Transport(transport_err))) => {
                    tracing::debug!(?transport_err, op = %op.id, "replay transport failure");
                    self.schedule_retry(&mut op, None, "transport-error").await;
                    report.failed += 1;
                    self.emit_retry_or_dead_letter(&op, &mut report);
                }
                Err(ResilienceError::CircuitOpen { .. }) => {
                    // The breaker tripped mid-chain (or another scope's chain
                    // tripped it concurrently). Leave this entry pending,
                    // untouched, and stop the rest of this scope's chain; the
                    // next `drain()` will pick it back up once recovered.
                    op.status = OperationStatus::Pending;
                    let _ = self.put_operation(&op).await;
                    break;
                }
                Err(other) => {
                    tracing::warn!(?other, op = %op.id, "unexpected resilience error replaying write");
                    self.schedule_retry(&mut op, None, "unexpected-error").await;
                    report.failed += 1;
                    self.emit_retry_or_dead_letter(&op, &mut report);
                }
            }
        }
        report
    }

    fn emit_retry_or_dead_letter(&self, op: &Operation, report: &mut DrainReport) {
        if op.status == OperationStatus::DeadLetter {
            report.dead_lettered += 1;
            let _ = self.inner.events.send(QueueEvent::DeadLettered { id: op.id });
        } else {
            let _ = self.inner.events.send(QueueEvent::Retrying {
                id: op.id,
                attempts: op.attempts,
                next_attempt_at_ms: op.next_attempt_at_ms,
            });
        }
    }

    async fn schedule_retry(&self, op: &mut Operation, status: Option<u16>, reason: &str) {
        op.attempts += 1;
        op.last_error = Some(reason.to_string());
        op.last_status_code = status;

        if op.attempts >= self.inner.config.max_attempts {
            op.status = OperationStatus::DeadLetter;
        } else {
            op.status = OperationStatus::Pending;
            let backoff_ms = backoff_with_full_jitter(op.attempts);
            op.next_attempt_at_ms = now_millis() + backoff_ms;
        }
        let _ = self.put_operation(op).await;
    }
}

/// `min(cap, base * 2^(attempts-1))` with full jitter, matching the circuit
/// breaker's backoff formula so queue retries and breaker cooldowns agree.
fn backoff_with_full_jitter(attempts: u32) -> u64 {
    const BASE_MS: u64 = 1000;
    const CAP_MS: u64 = 30_000;
    let exp = attempts.saturating_sub(1).min(20);
    let full = BASE_MS.saturating_mul(1u64 << exp).min(CAP_MS);
    rand::Rng::gen_range(&mut rand::thread_rng(), 0..=full)
}
