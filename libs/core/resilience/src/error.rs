//! Error catalog for the resilience layer.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ResilienceError {
    #[error("circuit '{circuit_name}' is open, reset scheduled at {reset_at}")]
    CircuitOpen {
        circuit_name: String,
        reset_at: DateTime<Utc>,
    },

    #[error("operation failed behind circuit '{0}': {1}")]
    OperationFailed(String, String),

    #[error("no health check registered for resource '{0}'")]
    UnknownResource(String),

    #[error("recovery action for '{0}' failed: {1}")]
    RecoveryFailed(String, String),
}
