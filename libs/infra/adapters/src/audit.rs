//! `AuditSink` contract (§6) and the fixed event-kind vocabulary recovered
//! from the original `sync_tracker.py`/`self_healing.py` (SPEC_FULL §B.5).
//! Concrete sinks (libsql-backed, in-memory) implement this trait; the
//! pipeline and job manager only ever depend on the trait object.

use async_trait::async_trait;
use cama_sync_models::{Conflict, SyncError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A closed set of auditable happenings, in place of the original's
/// free-form event strings (SPEC_FULL §B.5: "deterministic, auditable
/// behavior").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    JobCreated,
    JobStarted,
    JobCompleted,
    JobFailed,
    BatchProcessed,
    RecordHealed,
    ConflictDetected,
    ConflictResolved,
    CircuitOpened,
    CircuitClosed,
    StaleJobExpired,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist the job row itself (called on every lifecycle transition,
    /// not just creation, so the audit store always reflects current state).
    async fn record_job(&self, job: &cama_sync_models::Job) -> Result<(), SyncError>;

    async fn record_event(&self, job_id: Uuid, kind: AuditEventKind, payload: serde_json::Value) -> Result<(), SyncError>;

    async fn record_conflict(&self, job_id: Uuid, conflict: &Conflict) -> Result<(), SyncError>;
}

/// Reference sink used by tests and local development; not durable.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: tokio::sync::Mutex<Vec<(Uuid, AuditEventKind, serde_json::Value)>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events_for(&self, job_id: Uuid) -> Vec<(AuditEventKind, serde_json::Value)> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|(id, _, _)| *id == job_id)
            .map(|(_, kind, payload)| (*kind, payload.clone()))
            .collect()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record_job(&self, _job: &cama_sync_models::Job) -> Result<(), SyncError> {
        Ok(())
    }

    async fn record_event(&self, job_id: Uuid, kind: AuditEventKind, payload: serde_json::Value) -> Result<(), SyncError> {
        self.events.lock().await.push((job_id, kind, payload));
        Ok(())
    }

    async fn record_conflict(&self, job_id: Uuid, conflict: &Conflict) -> Result<(), SyncError> {
        let payload = serde_json::json!({
            "entity_type": conflict.entity_type,
            "source_id": conflict.source_id,
            "field": conflict.field,
        });
        self.events.lock().await.push((job_id, AuditEventKind::ConflictDetected, payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_filters_events_by_job() {
        let sink = InMemoryAuditSink::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        sink.record_event(a, AuditEventKind::JobStarted, serde_json::json!({})).await.unwrap();
        sink.record_event(b, AuditEventKind::JobStarted, serde_json::json!({})).await.unwrap();
        assert_eq!(sink.events_for(a).await.len(), 1);
    }
}
