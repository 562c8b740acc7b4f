//! `JobManager` (§4.9): submission, lifecycle transitions, cancellation and
//! the stale-job sweep. Every mutation goes through the repository's
//! compare-and-set so a worker completing a job and the stale sweeper
//! racing on the same row can never both win.

use crate::error::JobManagerError;
use crate::repository::{JobRepository, RepositoryError};
use cama_sync_adapters::{AuditEventKind, AuditSink};
use cama_sync_models::{CancellationToken, Job, JobKind, JobStatus};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{info, instrument, warn};
use uuid::Uuid;

impl From<RepositoryError> for JobManagerError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => JobManagerError::Repository("job not found".into()),
            RepositoryError::StatusMismatch => JobManagerError::Repository("concurrent status change".into()),
            RepositoryError::Backend(msg) => JobManagerError::Repository(msg),
        }
    }
}

pub struct JobManager {
    repository: Arc<dyn JobRepository>,
    audit: Arc<dyn AuditSink>,
    /// Cancellation signal for jobs currently in flight, handed to the
    /// pipeline at worker pickup time and flipped by `cancel`.
    tokens: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl JobManager {
    pub fn new(repository: Arc<dyn JobRepository>, audit: Arc<dyn AuditSink>) -> Self {
        Self { repository, audit, tokens: Mutex::new(HashMap::new()) }
    }

    #[instrument(skip(self, params))]
    pub async fn submit(
        &self,
        kind: JobKind,
        tenant_id: impl Into<String> + std::fmt::Debug,
        params: BTreeMap<String, serde_json::Value>,
    ) -> Result<Job, JobManagerError> {
        let job = Job::new(kind, tenant_id, params);
        self.repository.insert(job.clone()).await?;
        self.tokens.lock().await.insert(job.job_id, CancellationToken::new());
        self.audit.record_job(&job).await.map_err(|e| JobManagerError::Repository(e.to_string()))?;
        self.audit
            .record_event(job.job_id, AuditEventKind::JobCreated, serde_json::json!({ "kind": job.kind.to_string() }))
            .await
            .map_err(|e| JobManagerError::Repository(e.to_string()))?;
        info!(job_id = %job.job_id, kind = %job.kind, "job submitted");
        Ok(job)
    }

    pub async fn status(&self, job_id: Uuid) -> Result<Job, JobManagerError> {
        self.repository.get(job_id).await.map_err(|_| JobManagerError::NotFound(job_id))
    }

    /// The token a worker should pass into `SyncEngine::run_job` for this job.
    pub async fn cancellation_token(&self, job_id: Uuid) -> Option<CancellationToken> {
        self.tokens.lock().await.get(&job_id).cloned()
    }

    /// Worker pickup. Idempotent: re-entering `RUNNING` on an already-running
    /// job returns the existing row unchanged rather than re-stamping
    /// `started_at`.
    #[instrument(skip(self))]
    pub async fn mark_running(&self, job_id: Uuid) -> Result<Job, JobManagerError> {
        let current = self.status(job_id).await?;
        if current.status == JobStatus::Running {
            return Ok(current);
        }
        if current.status != JobStatus::Pending {
            return Err(JobManagerError::InvalidTransition {
                job_id,
                from: current.status.to_string(),
                to: JobStatus::Running.to_string(),
            });
        }

        let started_at = Utc::now();
        let job = self
            .repository
            .compare_and_set_status(
                job_id,
                JobStatus::Pending,
                Box::new(move |job| {
                    job.status = JobStatus::Running;
                    job.started_at = Some(started_at);
                }),
            )
            .await?;

        self.audit
            .record_event(job_id, AuditEventKind::JobStarted, serde_json::json!({}))
            .await
            .map_err(|e| JobManagerError::Repository(e.to_string()))?;
        Ok(job)
    }

    #[instrument(skip(self, result_summary))]
    pub async fn complete(
        &self,
        job_id: Uuid,
        result_summary: BTreeMap<String, serde_json::Value>,
    ) -> Result<Job, JobManagerError> {
        let job = self
            .repository
            .compare_and_set_status(
                job_id,
                JobStatus::Running,
                Box::new(move |job| {
                    job.status = JobStatus::Completed;
                    job.completed_at = Some(Utc::now());
                    job.result_summary = Some(result_summary);
                }),
            )
            .await
            .map_err(|_| JobManagerError::InvalidTransition {
                job_id,
                from: JobStatus::Running.to_string(),
                to: JobStatus::Completed.to_string(),
            })?;

        self.tokens.lock().await.remove(&job_id);
        self.audit
            .record_event(job_id, AuditEventKind::JobCompleted, serde_json::json!({}))
            .await
            .map_err(|e| JobManagerError::Repository(e.to_string()))?;
        Ok(job)
    }

    #[instrument(skip(self))]
    pub async fn fail(&self, job_id: Uuid, error: impl Into<String> + std::fmt::Debug) -> Result<Job, JobManagerError> {
        let error = error.into();
        let job = self
            .repository
            .compare_and_set_status(
                job_id,
                JobStatus::Running,
                Box::new({
                    let error = error.clone();
                    move |job| {
                        job.status = JobStatus::Failed;
                        job.completed_at = Some(Utc::now());
                        job.error = Some(error);
                    }
                }),
            )
            .await
            .map_err(|_| JobManagerError::InvalidTransition {
                job_id,
                from: JobStatus::Running.to_string(),
                to: JobStatus::Failed.to_string(),
            })?;

        self.tokens.lock().await.remove(&job_id);
        warn!(job_id = %job_id, %error, "job failed");
        self.audit
            .record_event(job_id, AuditEventKind::JobFailed, serde_json::json!({ "error": error }))
            .await
            .map_err(|e| JobManagerError::Repository(e.to_string()))?;
        Ok(job)
    }

    /// A worker observing its own cancellation token acknowledges it here,
    /// completing the `CANCELLING → CANCELLED` transition.
    pub async fn acknowledge_cancelled(&self, job_id: Uuid) -> Result<Job, JobManagerError> {
        let job = self
            .repository
            .compare_and_set_status(
                job_id,
                JobStatus::Cancelling,
                Box::new(|job| {
                    job.status = JobStatus::Cancelled;
                    job.completed_at = Some(Utc::now());
                }),
            )
            .await
            .map_err(|_| JobManagerError::InvalidTransition {
                job_id,
                from: JobStatus::Cancelling.to_string(),
                to: JobStatus::Cancelled.to_string(),
            })?;
        self.tokens.lock().await.remove(&job_id);
        Ok(job)
    }

    /// `PENDING → CANCELLED` immediately; `RUNNING → CANCELLING`
    /// cooperatively (the worker observes the token and later calls
    /// `acknowledge_cancelled`). Terminal statuses reject with
    /// `InvalidTransition`.
    #[instrument(skip(self))]
    pub async fn cancel(&self, job_id: Uuid) -> Result<Job, JobManagerError> {
        let current = self.status(job_id).await?;
        match current.status {
            JobStatus::Pending => {
                let job = self
                    .repository
                    .compare_and_set_status(
                        job_id,
                        JobStatus::Pending,
                        Box::new(|job| {
                            job.status = JobStatus::Cancelled;
                            job.completed_at = Some(Utc::now());
                        }),
                    )
                    .await?;
                self.tokens.lock().await.remove(&job_id);
                Ok(job)
            }
            JobStatus::Running => {
                let job = self
                    .repository
                    .compare_and_set_status(job_id, JobStatus::Running, Box::new(|job| job.status = JobStatus::Cancelling))
                    .await?;
                if let Some(token) = self.tokens.lock().await.get(&job_id) {
                    token.cancel();
                }
                Ok(job)
            }
            other => Err(JobManagerError::InvalidTransition {
                job_id,
                from: other.to_string(),
                to: JobStatus::Cancelled.to_string(),
            }),
        }
    }

    /// One pass of the stale-job sweep (§4.9): any `RUNNING` job whose
    /// `started_at` predates `now - stale_timeout` is failed with
    /// `error="timeout"`. CAS against `status=RUNNING` means a worker that
    /// completes the job in the same instant simply loses the race silently
    /// — not an error, just a missed sweep for a job that no longer needs one.
    #[instrument(skip(self))]
    pub async fn sweep_stale(&self, stale_timeout: Duration) -> Result<usize, JobManagerError> {
        let cutoff: DateTime<Utc> = Utc::now() - stale_timeout;
        let candidates = self.repository.running_started_before(cutoff).await?;
        let mut expired = 0usize;

        for job in candidates {
            let result = self
                .repository
                .compare_and_set_status(
                    job.job_id,
                    JobStatus::Running,
                    Box::new(|job| {
                        job.status = JobStatus::Failed;
                        job.completed_at = Some(Utc::now());
                        job.error = Some("timeout".to_string());
                    }),
                )
                .await;

            match result {
                Ok(_) => {
                    self.tokens.lock().await.remove(&job.job_id);
                    warn!(job_id = %job.job_id, "stale job expired");
                    self.audit
                        .record_event(job.job_id, AuditEventKind::StaleJobExpired, serde_json::json!({}))
                        .await
                        .map_err(|e| JobManagerError::Repository(e.to_string()))?;
                    expired += 1;
                }
                Err(RepositoryError::StatusMismatch) => {
                    // Worker finished concurrently; nothing to do.
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(expired)
    }

    /// Runs `sweep_stale` on `tick` forever. Mirrors the periodic
    /// `tokio::spawn` + `interval` shape used for background daemons
    /// throughout this codebase.
    pub fn spawn_stale_sweep(self: Arc<Self>, tick: std::time::Duration, stale_timeout: Duration) {
        tokio::spawn(async move {
            let mut ticker = interval(tick);
            loop {
                ticker.tick().await;
                if let Err(err) = self.sweep_stale(stale_timeout).await {
                    warn!(%err, "stale-job sweep failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryJobRepository;
    use cama_sync_adapters::InMemoryAuditSink;

    fn manager() -> JobManager {
        JobManager::new(Arc::new(InMemoryJobRepository::new()), Arc::new(InMemoryAuditSink::new()))
    }

    #[tokio::test]
    async fn submit_creates_pending_job() {
        let manager = manager();
        let job = manager.submit(JobKind::FullSync, "tenant-1", BTreeMap::new()).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.started_at.is_none());
    }

    #[tokio::test]
    async fn mark_running_is_idempotent() {
        let manager = manager();
        let job = manager.submit(JobKind::FullSync, "tenant-1", BTreeMap::new()).await.unwrap();
        let first = manager.mark_running(job.job_id).await.unwrap();
        let second = manager.mark_running(job.job_id).await.unwrap();
        assert_eq!(first.started_at, second.started_at);
    }

    #[tokio::test]
    async fn full_lifecycle_completes() {
        let manager = manager();
        let job = manager.submit(JobKind::IncrementalSync, "tenant-1", BTreeMap::new()).await.unwrap();
        manager.mark_running(job.job_id).await.unwrap();
        let completed = manager.complete(job.job_id, BTreeMap::new()).await.unwrap();
        assert_eq!(completed.status, JobStatus::Completed);
        assert!(completed.invariants_hold());
    }

    #[tokio::test]
    async fn cancel_pending_is_immediate() {
        let manager = manager();
        let job = manager.submit(JobKind::FullSync, "tenant-1", BTreeMap::new()).await.unwrap();
        let cancelled = manager.cancel(job.job_id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_running_is_cooperative() {
        let manager = manager();
        let job = manager.submit(JobKind::FullSync, "tenant-1", BTreeMap::new()).await.unwrap();
        manager.mark_running(job.job_id).await.unwrap();
        let cancelling = manager.cancel(job.job_id).await.unwrap();
        assert_eq!(cancelling.status, JobStatus::Cancelling);
        let token = manager.cancellation_token(job.job_id).await.unwrap();
        assert!(token.is_cancelled());
        let cancelled = manager.acknowledge_cancelled(job.job_id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_terminal_job_is_rejected() {
        let manager = manager();
        let job = manager.submit(JobKind::FullSync, "tenant-1", BTreeMap::new()).await.unwrap();
        manager.mark_running(job.job_id).await.unwrap();
        manager.complete(job.job_id, BTreeMap::new()).await.unwrap();
        let result = manager.cancel(job.job_id).await;
        assert!(matches!(result, Err(JobManagerError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn stale_sweep_fails_long_running_job_once() {
        let manager = manager();
        let job = manager.submit(JobKind::FullSync, "tenant-1", BTreeMap::new()).await.unwrap();
        manager.mark_running(job.job_id).await.unwrap();

        // Simulate a job that started well before the stale threshold by
        // sweeping with a zero timeout.
        let expired = manager.sweep_stale(Duration::seconds(0)).await.unwrap();
        assert_eq!(expired, 1);
        let job = manager.status(job.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("timeout"));

        let expired_again = manager.sweep_stale(Duration::seconds(0)).await.unwrap();
        assert_eq!(expired_again, 0);
    }
}
