//! Persistence contract for `JobManager`, modeled on the teacher's
//! transactional claim/CAS pattern (conditional writes on `status`).

use async_trait::async_trait;
use cama_sync_models::{Job, JobStatus};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum RepositoryError {
    NotFound,
    /// The row's current status no longer matches the CAS precondition.
    StatusMismatch,
    Backend(String),
}

impl std::fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryError::NotFound => write!(f, "job not found"),
            RepositoryError::StatusMismatch => write!(f, "job status changed concurrently"),
            RepositoryError::Backend(msg) => write!(f, "backend error: {msg}"),
        }
    }
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert(&self, job: Job) -> Result<(), RepositoryError>;

    async fn get(&self, job_id: Uuid) -> Result<Job, RepositoryError>;

    /// Conditional write: succeeds only if the stored row's status still
    /// equals `expected`. Returns the updated job on success.
    async fn compare_and_set_status(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        mutate: Box<dyn FnOnce(&mut Job) + Send>,
    ) -> Result<Job, RepositoryError>;

    /// Jobs with `status = RUNNING` and `started_at` older than `cutoff`,
    /// used by the stale-job sweep (§4.9).
    async fn running_started_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, RepositoryError>;
}
