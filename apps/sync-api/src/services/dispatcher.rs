//! Bounded worker pool (§5 "parallel worker pool for job execution, bounded
//! worker count, configurable"). `spawn` starts `worker_pool_size` workers,
//! each pulling jobs off the same channel — the channel itself is the queue,
//! so a burst of submissions beyond capacity simply backs up in the channel
//! buffer rather than spawning unbounded tasks.

use crate::state::{AppState, DispatchRequest};
use cama_sync_models::JobStatus;
use cama_sync_pipeline::ConflictResolver;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

pub fn spawn(state: AppState, worker_count: usize, receiver: mpsc::Receiver<DispatchRequest>) {
    let receiver = Arc::new(Mutex::new(receiver));
    for worker_id in 0..worker_count.max(1) {
        let state = state.clone();
        let receiver = receiver.clone();
        tokio::spawn(async move {
            info!(worker_id, "sync worker started");
            loop {
                let request = {
                    let mut receiver = receiver.lock().await;
                    receiver.recv().await
                };
                let Some(request) = request else {
                    info!(worker_id, "dispatch channel closed, worker exiting");
                    break;
                };
                process_job(&state, request).await;
            }
        });
    }
}

async fn process_job(state: &AppState, request: DispatchRequest) {
    let job_id = request.job_id;

    let job = match state.job_manager.mark_running(job_id).await {
        Ok(job) => job,
        Err(err) => {
            warn!(%job_id, %err, "job could not be marked running, skipping");
            return;
        }
    };

    let cancellation = match state.job_manager.cancellation_token(job_id).await {
        Some(token) => token,
        None => cama_sync_models::CancellationToken::new(),
    };

    // Read fresh off `CatalogStore` on every dispatch, same as `mapping`, so
    // a `reload()` takes effect on the next job rather than only at startup.
    let mapping = state.catalogs.field_mappings();
    let resolver = ConflictResolver::new((*state.catalogs.resolution_rules()).clone());
    let batch_size = request.batch_size.unwrap_or(state.config.batch_size);
    let outcome = state
        .engine
        .run_job(job_id, request.since, &mapping, &resolver, &request.entity_types, batch_size, &cancellation)
        .await;

    match outcome {
        Ok(outcome) => {
            if cancellation.is_cancelled() {
                if let Err(err) = state.job_manager.acknowledge_cancelled(job_id).await {
                    warn!(%job_id, %err, "failed to acknowledge cooperative cancellation");
                }
                return;
            }

            if let Some(new_watermark) = outcome.new_watermark {
                for entity_type in &request.entity_types {
                    let watermark = cama_sync_models::Watermark {
                        tenant_id: job.tenant_id.clone(),
                        entity_type: entity_type.clone(),
                        last_cutoff: new_watermark,
                    };
                    if let Err(err) = state.watermarks.advance(&watermark).await {
                        error!(%job_id, entity_type, %err, "failed to advance watermark");
                    }
                }
            }

            let mut result_summary = BTreeMap::new();
            for (entity_type, counters) in &outcome.per_entity {
                result_summary.insert(entity_type.clone(), serde_json::to_value(counters).unwrap_or_default());
            }

            if let Err(err) = state.job_manager.complete(job_id, result_summary).await {
                error!(%job_id, %err, "failed to mark job completed");
            }
        }
        Err(err) => {
            if let Err(complete_err) = state.job_manager.fail(job_id, err.to_string()).await {
                error!(%job_id, %complete_err, original_error = %err, "failed to mark job failed");
            }
        }
    }
}

pub fn job_is_terminal(status: JobStatus) -> bool {
    matches!(status, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
}
