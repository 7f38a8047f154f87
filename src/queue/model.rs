//! Data model for queued write operations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub type OperationId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Pending,
    InFlight,
    Conflict,
    DeadLetter,
    Done,
}

/// A mutation submitted by the caller, not yet assigned an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: String,
    pub headers: HashMap<String, String>,
    pub auth_scope: String,
    /// The document/record version the caller started from; carried through
    /// so a later 409 can hand the conflict engine a base value to diff against.
    pub base_version: Option<String>,
}

/// A persisted write-replay queue entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub method: HttpMethod,
    pub url: String,
    pub body: String,
    pub headers: HashMap<String, String>,
    pub auth_scope: String,
    pub base_version: Option<String>,
    pub status: OperationStatus,
    pub attempts: u32,
    pub next_attempt_at_ms: u64,
    pub enqueued_at_ms: u64,
    pub last_error: Option<String>,
    pub last_status_code: Option<u16>,
}

impl Operation {
    pub fn new(req: OutgoingRequest, now_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: req.method,
            url: req.url,
            body: req.body,
            headers: req.headers,
            auth_scope: req.auth_scope,
            base_version: req.base_version,
            status: OperationStatus::Pending,
            attempts: 0,
            next_attempt_at_ms: now_ms,
            enqueued_at_ms: now_ms,
            last_error: None,
            last_status_code: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            OperationStatus::Done | OperationStatus::DeadLetter | OperationStatus::Conflict
        )
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFilter {
    pub status: Option<OperationStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> OutgoingRequest {
        OutgoingRequest {
            method: HttpMethod::Post,
            url: "https://api.example.com/items".into(),
            body: "{\"name\":\"a\"}".into(),
            headers: HashMap::new(),
            auth_scope: "tenant-1".into(),
            base_version: None,
        }
    }

    #[test]
    fn new_operation_starts_pending_with_zero_attempts() {
        let op = Operation::new(sample_request(), 1000);
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.attempts, 0);
        assert_eq!(op.next_attempt_at_ms, 1000);
    }

    #[test]
    fn terminal_statuses() {
        let mut op = Operation::new(sample_request(), 0);
        assert!(!op.is_terminal());
        op.status = OperationStatus::Done;
        assert!(op.is_terminal());
        op.status = OperationStatus::DeadLetter;
        assert!(op.is_terminal());
        op.status = OperationStatus::Conflict;
        assert!(op.is_terminal());
        op.status = OperationStatus::InFlight;
        assert!(!op.is_terminal());
    }
}
