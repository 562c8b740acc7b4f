//! Router composition (§6). Grounded in the teacher's `routes.rs`: a CORS
//! layer wrapping a nested router, `.with_state(...)` applied once at the root.

use crate::handlers::{health, sync};
use crate::state::AppState;
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn build(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    let sync_routes = Router::new()
        .route("/full", post(sync::full_sync))
        .route("/incremental", post(sync::incremental_sync))
        .route("/status/:job_id", get(sync::status))
        .route("/cancel/:job_id", post(sync::cancel));

    let health_routes = Router::new()
        .route("/live", get(health::live))
        .route("/ready", get(health::ready));

    Router::new()
        .nest("/sync", sync_routes)
        .nest("/health", health_routes)
        .route("/metrics", get(health::metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
