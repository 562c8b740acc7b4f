//! Bootstrap (§6, §A.3), grounded in the teacher's `main.rs`: env loading,
//! tracing init, a manually-built multi-thread runtime with a larger-than-
//! default stack, and an explicit bind+serve rather than `#[tokio::main]`.

use cama_sync_adapters::{AuditEventKind, AuditSink, InMemorySourceAdapter, InMemoryTargetAdapter, SourceAdapter, TargetAdapter};
use cama_sync_config::{CatalogStore, SyncServiceConfig};
use cama_sync_db::{DbClient, LibsqlAuditSink, LibsqlJobRepository, WatermarkStore};
use cama_sync_job_manager::JobManager;
use cama_sync_observability::{init_tracing, PrometheusMetricsSink};
use cama_sync_pipeline::{ChangeDetector, SelfHealer, SyncEngine, Transformer, Validator};
use cama_sync_resilience::{BreakerConfig, CircuitBreaker, RetryConfig, RetryStrategy, SelfHealingOrchestrator};
use chrono::Datelike;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use cama_sync_api::state::AppState;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("sync-api");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_stack_size(4 * 1024 * 1024)
        .build()?;

    runtime.block_on(run())
}

async fn run() -> anyhow::Result<()> {
    let config = Arc::new(SyncServiceConfig::from_env()?);

    let auth_token = std::env::var("TURSO_AUTH_TOKEN").ok();
    let db = DbClient::connect(&config.database_url, auth_token).await?;

    let job_repository = Arc::new(LibsqlJobRepository::new(db.connection()?));
    let audit = Arc::new(LibsqlAuditSink::new(db.connection()?));
    let watermarks = Arc::new(WatermarkStore::new(db.connection()?));

    let job_manager = Arc::new(JobManager::new(job_repository, audit.clone()));
    job_manager.clone().spawn_stale_sweep(Duration::from_secs(60), chrono::Duration::minutes(config.stale_job_timeout_minutes));

    let catalogs = Arc::new(CatalogStore::load(config.field_mapping_path.clone(), config.resolution_rules_path.clone())?);

    // Real PACS/CAMA HTTP drivers are out of this engine's scope (see
    // SPEC_FULL §D); the in-memory reference adapters stand in until a
    // deployment wires its own `SourceAdapter`/`TargetAdapter`.
    let source: Arc<dyn SourceAdapter> = Arc::new(InMemorySourceAdapter::new());
    let target: Arc<dyn TargetAdapter> = Arc::new(InMemoryTargetAdapter::new());

    let orchestrator = Arc::new(SelfHealingOrchestrator::new());
    let breaker_audit_tx = spawn_breaker_audit_bridge(audit.clone());
    register_resilience_policy(&orchestrator, &config.resilience, breaker_audit_tx);

    let metrics = Arc::new(PrometheusMetricsSink::new());

    let current_year = chrono::Utc::now().year();
    let engine = Arc::new(SyncEngine::new(
        ChangeDetector::new(source.clone()),
        Transformer::new(),
        Validator::new(current_year),
        SelfHealer::new(Validator::new(current_year)),
        target.clone(),
        orchestrator.clone(),
        audit.clone(),
        metrics.clone(),
    ));

    let (dispatch_tx, dispatch_rx) = mpsc::channel(config.worker_pool_size.max(1) * 4);

    let state = AppState {
        job_manager,
        engine,
        catalogs,
        config: config.clone(),
        orchestrator,
        metrics,
        watermarks,
        source,
        target,
        dispatch_tx,
        shutting_down: Arc::new(AtomicBool::new(false)),
    };

    cama_sync_api::services::dispatcher::spawn(state.clone(), config.worker_pool_size, dispatch_rx);

    let app = cama_sync_api::routes::build(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "sync-api listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Registers a breaker/retry pair per resource named in the resilience
/// policy overlay (§6 Configuration). Health checks themselves need a
/// concrete adapter-bound probe and are left for a deployment's own
/// bootstrap to register via `orchestrator.register_health_check(...)`.
/// Every breaker is wired with `with_callbacks` so its OPEN/CLOSE
/// transitions reach the audit trail through `breaker_audit_tx`.
fn register_resilience_policy(
    orchestrator: &SelfHealingOrchestrator,
    policy: &cama_sync_config::ResiliencePolicy,
    breaker_audit_tx: mpsc::UnboundedSender<(String, AuditEventKind)>,
) {
    for (name, settings) in &policy.breakers {
        let on_open_tx = breaker_audit_tx.clone();
        let on_open_name = name.clone();
        let on_close_tx = breaker_audit_tx.clone();
        let on_close_name = name.clone();
        let breaker = CircuitBreaker::new(name.clone(), BreakerConfig::from(settings)).with_callbacks(
            Some(Box::new(move || {
                let _ = on_open_tx.send((on_open_name.clone(), AuditEventKind::CircuitOpened));
            })),
            Some(Box::new(move || {
                let _ = on_close_tx.send((on_close_name.clone(), AuditEventKind::CircuitClosed));
            })),
        );
        orchestrator.register_breaker(name.clone(), breaker);
    }
    for (name, settings) in &policy.retries {
        orchestrator.register_retry(name.clone(), RetryStrategy::new(name.clone(), RetryConfig::from(settings)));
    }
}

/// Bridges the circuit breaker's synchronous transition callbacks to the
/// async `AuditSink`. A `tokio::sync::mpsc` channel lets the sync callback
/// fire-and-forget a non-blocking `send`; this task owns the actual await.
/// Breaker transitions aren't scoped to any one job, so they're recorded
/// against the nil UUID rather than a real job id.
fn spawn_breaker_audit_bridge(audit: Arc<dyn AuditSink>) -> mpsc::UnboundedSender<(String, AuditEventKind)> {
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, AuditEventKind)>();
    tokio::spawn(async move {
        while let Some((breaker_name, kind)) = rx.recv().await {
            let payload = serde_json::json!({ "circuit": breaker_name });
            if let Err(err) = audit.record_event(Uuid::nil(), kind, payload).await {
                tracing::warn!(circuit = %breaker_name, error = %err, "failed to record circuit breaker audit event");
            }
        }
    });
    tx
}
