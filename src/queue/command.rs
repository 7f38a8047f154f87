//! Command-style introspection surface for the write replay queue.
//!
//! Mirrors the teacher's `control::command` / `control::handler` dispatch
//! split, minus the network transport and auth layer that command had (the
//! queue has no remote-control wire protocol to speak of): a plain enum of
//! requests and a handler that executes them against a `WriteReplayQueue`.

use super::model::{Operation, OperationId, OperationStatus};
use super::replay::WriteReplayQueue;
use super::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueCommand {
    List { status: Option<OperationStatus> },
    Requeue { id: OperationId },
    Discard { id: OperationId },
    SyncNow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueueCommandOutcome {
    Entries(Vec<Operation>),
    Requeued,
    Discarded,
    SyncRequested,
}

/// Dispatches `QueueCommand`s against a queue instance. Exists as its own
/// type (rather than inlined match arms at call sites) so a host UI can
/// hold one handler per queue and route arbitrary commands through it,
/// the same shape the teacher's `CommandHandler` gives its callers.
#[derive(Debug, Clone)]
pub struct QueueCommandHandler {
    queue: WriteReplayQueue,
}

impl QueueCommandHandler {
    pub fn new(queue: WriteReplayQueue) -> Self {
        Self { queue }
    }

    pub async fn dispatch(&self, command: QueueCommand) -> Result<QueueCommandOutcome, StoreError> {
        match command {
            QueueCommand::List { status } => {
                Ok(QueueCommandOutcome::Entries(self.queue.list(status).await?))
            }
            QueueCommand::Requeue { id } => {
                self.queue.requeue(id).await?;
                Ok(QueueCommandOutcome::Requeued)
            }
            QueueCommand::Discard { id } => {
                self.queue.discard(id).await?;
                Ok(QueueCommandOutcome::Discarded)
            }
            QueueCommand::SyncNow => {
                self.queue.request_sync();
                Ok(QueueCommandOutcome::SyncRequested)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerPolicy;
    use crate::network::NetworkDetector;
    use crate::queue::model::HttpMethod;
    use crate::queue::model::OutgoingRequest;
    use crate::queue::store::MemoryKvStore;
    use crate::queue::{MutationClient, MutationResponse, MutationTransportError, QueueConfig};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug)]
    struct NeverSends;

    #[async_trait]
    impl MutationClient for NeverSends {
        async fn send(
            &self,
            _op: &Operation,
            _key: OperationId,
            _header: &str,
        ) -> Result<MutationResponse, MutationTransportError> {
            Err(MutationTransportError::Network)
        }
    }

    fn handler() -> QueueCommandHandler {
        let queue = WriteReplayQueue::new(
            Arc::new(MemoryKvStore::new()),
            CircuitBreakerPolicy::new(3, Duration::from_secs(10)),
            NetworkDetector::new(Default::default()),
            Arc::new(NeverSends),
            QueueConfig::default(),
        );
        QueueCommandHandler::new(queue)
    }

    #[tokio::test]
    async fn list_returns_enqueued_entries() {
        let handler = handler();
        handler
            .queue
            .enqueue(OutgoingRequest {
                method: HttpMethod::Post,
                url: "https://api.example.com/items".into(),
                body: "{}".into(),
                headers: HashMap::new(),
                auth_scope: "tenant-1".into(),
                base_version: None,
            })
            .await
            .unwrap();

        let outcome = handler.dispatch(QueueCommand::List { status: None }).await.unwrap();
        match outcome {
            QueueCommandOutcome::Entries(entries) => assert_eq!(entries.len(), 1),
            other => panic!("expected entries, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn discard_removes_entry() {
        let handler = handler();
        let id = handler
            .queue
            .enqueue(OutgoingRequest {
                method: HttpMethod::Post,
                url: "https://api.example.com/items".into(),
                body: "{}".into(),
                headers: HashMap::new(),
                auth_scope: "tenant-1".into(),
                base_version: None,
            })
            .await
            .unwrap();

        handler.dispatch(QueueCommand::Discard { id }).await.unwrap();
        assert!(handler.queue.get(id).await.unwrap().is_none());
    }
}
