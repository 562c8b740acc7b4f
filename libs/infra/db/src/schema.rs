//! Persisted state layout (§6): `jobs`, `job_events`, `watermarks` and
//! `conflicts`. Applied idempotently with `CREATE TABLE IF NOT EXISTS` —
//! cheap enough to run on every connect, the way the teacher's bootstrap does.

use crate::errors::DbError;
use libsql::Connection;

const TABLES: &[(&str, &str)] = &[
    (
        "jobs",
        "CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            params_json TEXT NOT NULL,
            result_summary_json TEXT,
            error TEXT
        )",
    ),
    (
        "job_events",
        "CREATE TABLE IF NOT EXISTS job_events (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            ts TEXT NOT NULL,
            kind TEXT NOT NULL,
            payload_json TEXT NOT NULL
        )",
    ),
    (
        "watermarks",
        "CREATE TABLE IF NOT EXISTS watermarks (
            tenant_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            last_cutoff_ts TEXT NOT NULL,
            PRIMARY KEY (tenant_id, entity_type)
        )",
    ),
    (
        "conflicts",
        "CREATE TABLE IF NOT EXISTS conflicts (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            source_id TEXT NOT NULL,
            field TEXT NOT NULL,
            source_value_json TEXT NOT NULL,
            target_value_json TEXT NOT NULL,
            strategy TEXT,
            resolved_value_json TEXT,
            ts TEXT NOT NULL
        )",
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_jobs_tenant_status ON jobs (tenant_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_job_events_job_id ON job_events (job_id)",
    "CREATE INDEX IF NOT EXISTS idx_conflicts_job_id ON conflicts (job_id)",
];

pub async fn apply_schema(connection: &Connection) -> Result<(), DbError> {
    for (name, ddl) in TABLES {
        connection.execute(ddl, ()).await.map_err(|e| {
            tracing::error!(table = *name, error = %e, "failed to create table");
            DbError::Query(e)
        })?;
    }
    for ddl in INDEXES {
        connection.execute(ddl, ()).await?;
    }
    Ok(())
}
