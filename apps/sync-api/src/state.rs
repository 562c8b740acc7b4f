//! Shared application state handed to every axum handler (§6).

use cama_sync_adapters::{SourceAdapter, TargetAdapter};
use cama_sync_config::{CatalogStore, SyncServiceConfig};
use cama_sync_db::WatermarkStore;
use cama_sync_job_manager::JobManager;
use cama_sync_observability::PrometheusMetricsSink;
use cama_sync_pipeline::SyncEngine;
use cama_sync_resilience::SelfHealingOrchestrator;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One unit of dispatchable work: a job that has already been accepted
/// (persisted `PENDING`) and is waiting for a free worker slot (§5).
pub struct DispatchRequest {
    pub job_id: Uuid,
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub entity_types: Vec<String>,
    pub batch_size: Option<usize>,
}

#[derive(Clone)]
pub struct AppState {
    pub job_manager: Arc<JobManager>,
    pub engine: Arc<SyncEngine>,
    pub catalogs: Arc<CatalogStore>,
    pub config: Arc<SyncServiceConfig>,
    pub orchestrator: Arc<SelfHealingOrchestrator>,
    pub metrics: Arc<PrometheusMetricsSink>,
    pub watermarks: Arc<WatermarkStore>,
    pub source: Arc<dyn SourceAdapter>,
    pub target: Arc<dyn TargetAdapter>,
    pub dispatch_tx: mpsc::Sender<DispatchRequest>,
    pub shutting_down: Arc<std::sync::atomic::AtomicBool>,
}
