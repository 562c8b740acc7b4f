//! HTTP control plane over `JobManager` (§6): submission, status, cancel,
//! liveness/readiness and Prometheus metrics, plus the bounded worker pool
//! that actually runs jobs against `SyncEngine`.

pub mod errors;
pub mod handlers;
pub mod routes;
pub mod services;
pub mod state;
