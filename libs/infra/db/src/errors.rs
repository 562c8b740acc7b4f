//! Persistence errors, mapped at the edge onto `SyncError`/`RepositoryError`
//! for callers that don't need libsql-specific detail.

use cama_sync_job_manager::RepositoryError;
use cama_sync_models::SyncError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(#[from] libsql::Error),

    #[error("row mapping failed: {0}")]
    Mapping(String),

    #[error("row not found")]
    NotFound,
}

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        SyncError::Transient(err.to_string())
    }
}

impl From<DbError> for RepositoryError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => RepositoryError::NotFound,
            other => RepositoryError::Backend(other.to_string()),
        }
    }
}
