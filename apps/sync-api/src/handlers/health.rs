//! `/health/*` and `/metrics` handlers (§6).

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use cama_sync_models::ResourceStatus;
use serde::Serialize;
use std::sync::atomic::Ordering;

#[derive(Serialize)]
struct LiveBody {
    status: &'static str,
}

pub async fn live(State(state): State<AppState>) -> (StatusCode, Json<LiveBody>) {
    if state.shutting_down.load(Ordering::SeqCst) {
        (StatusCode::SERVICE_UNAVAILABLE, Json(LiveBody { status: "shutting_down" }))
    } else {
        (StatusCode::OK, Json(LiveBody { status: "alive" }))
    }
}

#[derive(Serialize)]
struct ReadyBody {
    resources: Vec<ResourceReport>,
}

#[derive(Serialize)]
struct ResourceReport {
    resource_id: String,
    status: ResourceStatus,
}

pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyBody>) {
    let resources: Vec<ResourceReport> = ["source", "target"]
        .iter()
        .filter_map(|id| state.orchestrator.resource_status(id))
        .map(|health| ResourceReport { resource_id: health.resource_id, status: health.status })
        .collect();

    let all_healthy = resources.iter().all(|r| r.status == ResourceStatus::Healthy);
    let status_code = if all_healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(ReadyBody { resources }))
}

pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.export()
}
