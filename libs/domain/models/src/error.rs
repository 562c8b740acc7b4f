//! The error taxonomy shared across the pipeline and the resilience layer (§7).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The stable kind discriminant used for audit records and HTTP status
/// mapping. Kept separate from `SyncError` so it round-trips through JSON
/// without dragging the full error payload along.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Transient,
    RemoteUnavailable,
    InputInvalid,
    RecordRejected,
    ConflictUnresolved,
    Internal,
}

/// Errors that can surface from any sync-pipeline or resilience operation.
/// `kind()` drives retry/breaker eligibility and HTTP status mapping; it
/// never changes after construction.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error("record rejected: {0}")]
    RecordRejected(String),

    #[error("conflict left unresolved: {0}")]
    ConflictUnresolved(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Transient(_) => ErrorKind::Transient,
            SyncError::RemoteUnavailable(_) => ErrorKind::RemoteUnavailable,
            SyncError::InputInvalid(_) => ErrorKind::InputInvalid,
            SyncError::RecordRejected(_) => ErrorKind::RecordRejected,
            SyncError::ConflictUnresolved(_) => ErrorKind::ConflictUnresolved,
            SyncError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a `RetryStrategy`'s default `retry_on` set should consider
    /// this error retryable. `RemoteUnavailable` is excluded: inline retry
    /// budgets do not cover it, only the orchestrator's recovery action does (§7).
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }
}
