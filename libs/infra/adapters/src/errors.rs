//! Adapter-local error catalog (mirrors the teacher's per-crate error enums).

use cama_sync_models::SyncError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("connection to source/target system failed: {0}")]
    ConnectionFailed(String),

    #[error("malformed query predicate: {0}")]
    QueryError(String),

    #[error("entity type '{0}' is not served by this adapter")]
    UnknownEntityType(String),
}

impl From<AdapterError> for SyncError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::ConnectionFailed(msg) => SyncError::RemoteUnavailable(msg),
            AdapterError::QueryError(msg) => SyncError::InputInvalid(msg),
            AdapterError::UnknownEntityType(msg) => SyncError::InputInvalid(msg),
        }
    }
}
