//! Conflict record data model.

use crate::queue::OperationId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictStatus {
    AwaitingUser,
    Resolving,
    Resolved,
    Abandoned,
}

/// The four actions a user (or an automated policy standing in for one) can
/// take on a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    KeepMine,
    UseTheirs,
    Merge,
    ForceSave,
}

/// One write-write conflict, created when a replayed write comes back 409.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub operation_id: OperationId,
    pub base_version: Option<String>,
    pub current_version: Option<String>,
    pub mine_value: String,
    pub theirs_value: Option<String>,
    pub status: ConflictStatus,
    pub created_at_ms: u64,
    /// How many times this same operation has hit a 409 after a prior
    /// resolution attempt; escalates to dead-letter past a threshold.
    pub repeat_count: u32,
}

impl ConflictRecord {
    pub fn new(
        operation_id: OperationId,
        base_version: Option<String>,
        current_version: Option<String>,
        mine_value: String,
        theirs_value: Option<String>,
        now_ms: u64,
    ) -> Self {
        Self {
            operation_id,
            base_version,
            current_version,
            mine_value,
            theirs_value,
            status: ConflictStatus::AwaitingUser,
            created_at_ms: now_ms,
            repeat_count: 0,
        }
    }
}
