//! Durable write replay queue: accept mutations unconditionally while
//! offline, persist them, and replay in FIFO-per-scope order once the
//! network and circuit breaker allow it.

pub mod command;
pub mod model;
pub mod replay;
pub mod store;

pub use command::{QueueCommand, QueueCommandHandler, QueueCommandOutcome};
pub use model::{HttpMethod, Operation, OperationId, OperationStatus, OutgoingRequest, StatusFilter};
pub use replay::{
    CacheInvalidationHook, ConflictHandoff, ConflictPayload, DrainReport, MutationClient,
    MutationResponse, MutationTransportError, QueueConfig, QueueEvent, WriteReplayQueue, MAX_ATTEMPTS,
    MAX_BATCH,
};
pub use store::{KvStore, MemoryKvStore, StoreError};

#[cfg(feature = "redis-store")]
pub use store::RedisKvStore;
