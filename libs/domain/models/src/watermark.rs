//! Incremental sync cutoff tracking (§3, §4.10).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The cutoff timestamp for a `(tenant_id, entity_type)` pair, advanced
/// atomically only after a fully successful incremental job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watermark {
    pub tenant_id: String,
    pub entity_type: String,
    pub last_cutoff: DateTime<Utc>,
}
