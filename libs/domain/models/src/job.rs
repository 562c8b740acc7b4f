//! Job entity and its lifecycle states (§3, §4.9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// The kind of work a job performs. Only `FullSync` and `IncrementalSync`
/// are driven by `SyncEngine`; the remaining variants are accepted by
/// `JobManager` as opaque job kinds sharing the same lifecycle substrate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    FullSync,
    IncrementalSync,
    Report,
    MarketAnalysis,
    GisExport,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            JobKind::FullSync => "FULL_SYNC",
            JobKind::IncrementalSync => "INCREMENTAL_SYNC",
            JobKind::Report => "REPORT",
            JobKind::MarketAnalysis => "MARKET_ANALYSIS",
            JobKind::GisExport => "GIS_EXPORT",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelling,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelling => "CANCELLING",
            JobStatus::Cancelled => "CANCELLED",
        };
        f.write_str(label)
    }
}

/// A unit of orchestrated work. Mutated only by `JobManager`; every other
/// component treats it as read-only context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub tenant_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub params: BTreeMap<String, serde_json::Value>,
    pub result_summary: Option<BTreeMap<String, serde_json::Value>>,
    pub error: Option<String>,
}

impl Job {
    /// A freshly submitted job: `PENDING`, no start/completion timestamps.
    pub fn new(kind: JobKind, tenant_id: impl Into<String>, params: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            kind,
            tenant_id: tenant_id.into(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            params,
            result_summary: None,
            error: None,
        }
    }

    /// `completed_at` is set iff the job is in a terminal state. Whether
    /// `started_at` is set is path-dependent (a job cancelled directly from
    /// `PENDING` never ran) so only the completion invariant is checked here.
    pub fn invariants_hold(&self) -> bool {
        self.completed_at.is_some() == self.status.is_terminal()
    }
}
