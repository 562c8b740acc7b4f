//! Job lifecycle errors (§4.9, §7).

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum JobManagerError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {job_id} cannot transition from {from} to {to}")]
    InvalidTransition { job_id: Uuid, from: String, to: String },

    #[error("persistence error: {0}")]
    Repository(String),
}
