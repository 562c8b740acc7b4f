//! `SourceAdapter` / `TargetAdapter` contracts (§6). Every concrete PACS or
//! CAMA driver implements these; the sync pipeline only ever depends on the
//! trait object, never on a specific backend.

use async_trait::async_trait;
use cama_sync_models::{SourceRecord, SyncError, TransformedRecord};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// An existing record as read back from the target system, shaped the same
/// way a `TransformedRecord`'s `target_data` is, plus its resolved target id.
#[derive(Debug, Clone)]
pub struct TargetRecord {
    pub target_id: String,
    pub data: BTreeMap<String, serde_json::Value>,
}

/// Whether an `Upsert` created a new target record or updated an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn connect(&self) -> Result<(), SyncError>;
    async fn disconnect(&self) -> Result<(), SyncError>;
    async fn healthy(&self) -> bool;

    /// Page through records modified after `since` (exclusive), ordered by
    /// `last_modified` DESC, `source_id` ASC. `since = None` means "all".
    async fn get_changed(
        &self,
        entity_type: &str,
        since: Option<DateTime<Utc>>,
        batch_size: usize,
        offset: usize,
    ) -> Result<(Vec<SourceRecord>, usize), SyncError>;

    /// Fetch related records for a set of parent ids. `parent_ids = []` must
    /// return empty maps, never an error (§4.1 edge case).
    async fn get_related(
        &self,
        parent_entity_type: &str,
        parent_ids: &[String],
        related_entity_types: &[String],
    ) -> Result<BTreeMap<String, Vec<SourceRecord>>, SyncError>;

    async fn get_count(&self, entity_type: &str) -> Result<usize, SyncError>;
}

#[async_trait]
pub trait TargetAdapter: Send + Sync {
    async fn connect(&self) -> Result<(), SyncError>;
    async fn disconnect(&self) -> Result<(), SyncError>;
    async fn healthy(&self) -> bool;

    async fn get(&self, entity_type: &str, source_id: &str) -> Result<Option<TargetRecord>, SyncError>;

    /// Build a `SourceID -> TargetID` map for a batch; ids with no existing
    /// target record are simply absent from the result.
    async fn lookup_target_ids(
        &self,
        entity_type: &str,
        source_ids: &[String],
    ) -> Result<BTreeMap<String, String>, SyncError>;

    /// Create-or-update keyed on `record.source_id`. Must be idempotent:
    /// upserting the same record twice yields the same target id and state.
    async fn upsert(&self, entity_type: &str, record: &TransformedRecord) -> Result<(String, UpsertOutcome), SyncError>;

    async fn delete(&self, entity_type: &str, target_id: &str) -> Result<bool, SyncError>;
}
