//! `JobRepository` (§6 `jobs` table) backed by libsql, with compare-and-set
//! status writes so a worker completing a job and the stale sweeper can
//! never both win (§5 "Shared-resource policy").

use crate::errors::DbError;
use async_trait::async_trait;
use cama_sync_job_manager::{JobRepository, RepositoryError};
use cama_sync_models::{Job, JobKind, JobStatus};
use chrono::{DateTime, Utc};
use libsql::{params, Connection, Row};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use uuid::Uuid;

fn job_kind_from_str(s: &str) -> Option<JobKind> {
    match s {
        "FULL_SYNC" => Some(JobKind::FullSync),
        "INCREMENTAL_SYNC" => Some(JobKind::IncrementalSync),
        "REPORT" => Some(JobKind::Report),
        "MARKET_ANALYSIS" => Some(JobKind::MarketAnalysis),
        "GIS_EXPORT" => Some(JobKind::GisExport),
        _ => None,
    }
}

fn job_status_from_str(s: &str) -> Option<JobStatus> {
    match s {
        "PENDING" => Some(JobStatus::Pending),
        "RUNNING" => Some(JobStatus::Running),
        "COMPLETED" => Some(JobStatus::Completed),
        "FAILED" => Some(JobStatus::Failed),
        "CANCELLING" => Some(JobStatus::Cancelling),
        "CANCELLED" => Some(JobStatus::Cancelled),
        _ => None,
    }
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

fn row_to_job(row: &Row) -> Result<Job, DbError> {
    let job_id: String = row.get(0).map_err(DbError::Query)?;
    let kind: String = row.get(1).map_err(DbError::Query)?;
    let tenant_id: String = row.get(2).map_err(DbError::Query)?;
    let status: String = row.get(3).map_err(DbError::Query)?;
    let created_at: String = row.get(4).map_err(DbError::Query)?;
    let started_at: Option<String> = row.get(5).map_err(DbError::Query)?;
    let completed_at: Option<String> = row.get(6).map_err(DbError::Query)?;
    let params_json: String = row.get(7).map_err(DbError::Query)?;
    let result_summary_json: Option<String> = row.get(8).map_err(DbError::Query)?;
    let error: Option<String> = row.get(9).map_err(DbError::Query)?;

    Ok(Job {
        job_id: Uuid::parse_str(&job_id).map_err(|e| DbError::Mapping(e.to_string()))?,
        kind: job_kind_from_str(&kind).ok_or_else(|| DbError::Mapping(format!("unknown job kind {kind}")))?,
        tenant_id,
        status: job_status_from_str(&status).ok_or_else(|| DbError::Mapping(format!("unknown job status {status}")))?,
        created_at: parse_ts(&created_at).ok_or_else(|| DbError::Mapping("invalid created_at".into()))?,
        started_at: started_at.as_deref().and_then(parse_ts),
        completed_at: completed_at.as_deref().and_then(parse_ts),
        params: serde_json::from_str(&params_json).map_err(|e| DbError::Mapping(e.to_string()))?,
        result_summary: result_summary_json.as_deref().map(serde_json::from_str).transpose().map_err(|e| DbError::Mapping(e.to_string()))?,
        error,
    })
}

pub struct LibsqlJobRepository {
    connection: Mutex<Connection>,
}

impl LibsqlJobRepository {
    pub fn new(connection: Connection) -> Self {
        Self { connection: Mutex::new(connection) }
    }

    async fn fetch(&self, job_id: Uuid) -> Result<Job, DbError> {
        let connection = self.connection.lock().await;
        let mut rows = connection
            .query(
                "SELECT job_id, kind, tenant_id, status, created_at, started_at, completed_at, params_json, result_summary_json, error FROM jobs WHERE job_id = ?1",
                params![job_id.to_string()],
            )
            .await
            .map_err(DbError::Query)?;
        let row = rows.next().await.map_err(DbError::Query)?.ok_or(DbError::NotFound)?;
        row_to_job(&row)
    }

    async fn write(&self, job: &Job, expected_status: Option<JobStatus>) -> Result<u64, DbError> {
        let connection = self.connection.lock().await;
        let params_json = serde_json::to_string(&job.params).map_err(|e| DbError::Mapping(e.to_string()))?;
        let result_summary_json = job.result_summary.as_ref().map(serde_json::to_string).transpose().map_err(|e| DbError::Mapping(e.to_string()))?;

        let affected = if let Some(expected) = expected_status {
            connection
                .execute(
                    "UPDATE jobs SET status = ?1, started_at = ?2, completed_at = ?3, result_summary_json = ?4, error = ?5
                     WHERE job_id = ?6 AND status = ?7",
                    params![
                        job.status.to_string(),
                        job.started_at.map(|t| t.to_rfc3339()),
                        job.completed_at.map(|t| t.to_rfc3339()),
                        result_summary_json,
                        job.error.clone(),
                        job.job_id.to_string(),
                        expected.to_string(),
                    ],
                )
                .await
                .map_err(DbError::Query)?
        } else {
            connection
                .execute(
                    "INSERT INTO jobs (job_id, kind, tenant_id, status, created_at, started_at, completed_at, params_json, result_summary_json, error)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        job.job_id.to_string(),
                        job.kind.to_string(),
                        job.tenant_id.clone(),
                        job.status.to_string(),
                        job.created_at.to_rfc3339(),
                        job.started_at.map(|t| t.to_rfc3339()),
                        job.completed_at.map(|t| t.to_rfc3339()),
                        params_json,
                        result_summary_json,
                        job.error.clone(),
                    ],
                )
                .await
                .map_err(DbError::Query)?
        };

        Ok(affected)
    }
}

#[async_trait]
impl JobRepository for LibsqlJobRepository {
    async fn insert(&self, job: Job) -> Result<(), RepositoryError> {
        self.write(&job, None).await.map_err(DbError::into)?;
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Job, RepositoryError> {
        self.fetch(job_id).await.map_err(Into::into)
    }

    async fn compare_and_set_status(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        mutate: Box<dyn FnOnce(&mut Job) + Send>,
    ) -> Result<Job, RepositoryError> {
        let mut job = self.fetch(job_id).await.map_err(DbError::into)?;
        if job.status != expected {
            return Err(RepositoryError::StatusMismatch);
        }
        mutate(&mut job);

        let affected = self.write(&job, Some(expected)).await.map_err(DbError::into)?;
        if affected == 0 {
            return Err(RepositoryError::StatusMismatch);
        }
        Ok(job)
    }

    async fn running_started_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, RepositoryError> {
        let connection = self.connection.lock().await;
        let mut rows = connection
            .query(
                "SELECT job_id, kind, tenant_id, status, created_at, started_at, completed_at, params_json, result_summary_json, error
                 FROM jobs WHERE status = 'RUNNING' AND started_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))?;

        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| RepositoryError::Backend(e.to_string()))? {
            jobs.push(row_to_job(&row).map_err(DbError::into)?);
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;
    use std::collections::BTreeMap;

    async fn repository() -> LibsqlJobRepository {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        let connection = db.connect().unwrap();
        crate::schema::apply_schema(&connection).await.unwrap();
        LibsqlJobRepository::new(connection)
    }

    #[tokio::test]
    async fn insert_and_get_round_trips() {
        let repo = repository().await;
        let job = Job::new(JobKind::FullSync, "tenant-1", BTreeMap::new());
        repo.insert(job.clone()).await.unwrap();

        let fetched = repo.get(job.job_id).await.unwrap();
        assert_eq!(fetched.job_id, job.job_id);
        assert_eq!(fetched.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn compare_and_set_rejects_stale_expectation() {
        let repo = repository().await;
        let job = Job::new(JobKind::FullSync, "tenant-1", BTreeMap::new());
        repo.insert(job.clone()).await.unwrap();

        let result = repo
            .compare_and_set_status(job.job_id, JobStatus::Running, Box::new(|_| {}))
            .await;
        assert!(matches!(result, Err(RepositoryError::StatusMismatch)));
    }

    #[tokio::test]
    async fn compare_and_set_applies_mutation_on_match() {
        let repo = repository().await;
        let job = Job::new(JobKind::FullSync, "tenant-1", BTreeMap::new());
        repo.insert(job.clone()).await.unwrap();

        let updated = repo
            .compare_and_set_status(job.job_id, JobStatus::Pending, Box::new(|j| j.status = JobStatus::Running))
            .await
            .unwrap();
        assert_eq!(updated.status, JobStatus::Running);
    }
}
