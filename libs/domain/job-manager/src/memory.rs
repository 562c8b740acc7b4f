//! Reference `JobRepository` used by tests and local development; not durable.

use crate::repository::{JobRepository, RepositoryError};
use async_trait::async_trait;
use cama_sync_models::{Job, JobStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn insert(&self, job: Job) -> Result<(), RepositoryError> {
        self.jobs.lock().await.insert(job.job_id, job);
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Job, RepositoryError> {
        self.jobs.lock().await.get(&job_id).cloned().ok_or(RepositoryError::NotFound)
    }

    async fn compare_and_set_status(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        mutate: Box<dyn FnOnce(&mut Job) + Send>,
    ) -> Result<Job, RepositoryError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&job_id).ok_or(RepositoryError::NotFound)?;
        if job.status != expected {
            return Err(RepositoryError::StatusMismatch);
        }
        mutate(job);
        Ok(job.clone())
    }

    async fn running_started_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, RepositoryError> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .values()
            .filter(|j| j.status == JobStatus::Running && j.started_at.map(|s| s < cutoff).unwrap_or(false))
            .cloned()
            .collect())
    }
}
