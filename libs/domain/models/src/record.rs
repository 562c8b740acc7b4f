//! Source and transformed record entities (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A page of raw data as read from the source system, keyed by
/// `(entity_type, source_id)`. `payload` holds the full dynamic field set;
/// typed validation and transformation both read from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub entity_type: String,
    pub source_id: String,
    pub payload: BTreeMap<String, serde_json::Value>,
    pub last_modified: DateTime<Utc>,
}

impl SourceRecord {
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.payload.get(name)
    }
}

/// The result of mapping a `SourceRecord` onto the target schema.
/// `target_id` is `Some` only when a corresponding target record was
/// resolved via `TargetAdapter::lookup_target_ids`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformedRecord {
    pub entity_type: String,
    pub source_id: String,
    pub target_id: Option<String>,
    pub target_data: BTreeMap<String, serde_json::Value>,
    pub notes: Vec<String>,
}

impl TransformedRecord {
    pub fn new(entity_type: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            source_id: source_id.into(),
            target_id: None,
            target_data: BTreeMap::new(),
            notes: Vec::new(),
        }
    }

    pub fn note(&mut self, message: impl Into<String>) {
        self.notes.push(message.into());
    }
}
