//! `/sync/*` handlers (§6): a thin shell over `JobManager` plus the
//! dispatcher channel — nothing here touches the pipeline directly.

use crate::errors::ApiError;
use crate::state::{AppState, DispatchRequest};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use cama_sync_models::{JobKind, JobStatus};
use cama_sync_pipeline::ENTITY_ORDER;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

fn default_entity_types() -> Vec<String> {
    ENTITY_ORDER.iter().map(|s| s.to_string()).collect()
}

#[derive(Deserialize)]
pub struct FullSyncRequest {
    pub tenant_id: String,
    #[serde(default)]
    pub entity_types: Option<Vec<String>>,
    #[serde(default)]
    pub params: Option<BTreeMap<String, Value>>,
}

#[derive(Deserialize)]
pub struct IncrementalSyncRequest {
    pub tenant_id: String,
    #[serde(default)]
    pub entity_types: Option<Vec<String>>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

#[derive(Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counters: Option<BTreeMap<String, Value>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

async fn enqueue(state: &AppState, job_id: Uuid, since: Option<DateTime<Utc>>, entity_types: Vec<String>, batch_size: Option<usize>) -> Result<(), ApiError> {
    state
        .dispatch_tx
        .send(DispatchRequest { job_id, since, entity_types, batch_size })
        .await
        .map_err(|_| ApiError::Internal("dispatch channel closed".to_string()))
}

pub async fn full_sync(State(state): State<AppState>, Json(request): Json<FullSyncRequest>) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    if request.tenant_id.trim().is_empty() {
        return Err(ApiError::InputInvalid("tenant_id must not be empty".to_string()));
    }
    let entity_types = request.entity_types.unwrap_or_else(default_entity_types);

    let mut params = request.params.unwrap_or_default();
    params.insert("entity_types".to_string(), serde_json::to_value(&entity_types).unwrap_or_default());

    let job = state.job_manager.submit(JobKind::FullSync, request.tenant_id, params).await?;
    enqueue(&state, job.job_id, None, entity_types, None).await?;

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id: job.job_id, status: job.status, since: None })))
}

pub async fn incremental_sync(
    State(state): State<AppState>,
    Json(request): Json<IncrementalSyncRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    if request.tenant_id.trim().is_empty() {
        return Err(ApiError::InputInvalid("tenant_id must not be empty".to_string()));
    }
    let entity_types = request.entity_types.unwrap_or_else(default_entity_types);

    let since = match request.since {
        Some(since) => Some(since),
        None => {
            let representative = entity_types.first().cloned().unwrap_or_else(|| "property".to_string());
            state
                .watermarks
                .get(&request.tenant_id, &representative)
                .await
                .map_err(|err| ApiError::Internal(err.to_string()))?
                .map(|w| w.last_cutoff)
        }
    };

    let mut params = BTreeMap::new();
    params.insert("entity_types".to_string(), serde_json::to_value(&entity_types).unwrap_or_default());
    if let Some(batch_size) = request.batch_size {
        params.insert("batch_size".to_string(), Value::from(batch_size));
    }

    let job = state.job_manager.submit(JobKind::IncrementalSync, request.tenant_id, params).await?;
    enqueue(&state, job.job_id, since, entity_types, request.batch_size).await?;

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id: job.job_id, status: job.status, since })))
}

pub async fn status(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> Result<Json<StatusResponse>, ApiError> {
    let job = state.job_manager.status(job_id).await?;
    Ok(Json(StatusResponse {
        job_id: job.job_id,
        kind: job.kind,
        status: job.status,
        counters: job.result_summary,
        started_at: job.started_at,
        completed_at: job.completed_at,
        error: job.error,
    }))
}

pub async fn cancel(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> Result<Json<CancelResponse>, ApiError> {
    let job = state.job_manager.cancel(job_id).await?;
    Ok(Json(CancelResponse { job_id: job.job_id, status: job.status }))
}
