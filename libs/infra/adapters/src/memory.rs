//! In-memory reference adapters. Real PACS/CAMA drivers are out of scope;
//! these back the pipeline's own tests and local development, and double as
//! the executable contract other adapters are checked against.

use crate::traits::{SourceAdapter, TargetAdapter, TargetRecord, UpsertOutcome};
use async_trait::async_trait;
use cama_sync_models::{SourceRecord, SyncError, TransformedRecord};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemorySourceAdapter {
    // entity_type -> source_id -> record
    records: RwLock<BTreeMap<String, BTreeMap<String, SourceRecord>>>,
}

impl InMemorySourceAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, record: SourceRecord) {
        let mut records = self.records.write().await;
        records
            .entry(record.entity_type.clone())
            .or_default()
            .insert(record.source_id.clone(), record);
    }
}

#[async_trait]
impl SourceAdapter for InMemorySourceAdapter {
    async fn connect(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn healthy(&self) -> bool {
        true
    }

    async fn get_changed(
        &self,
        entity_type: &str,
        since: Option<DateTime<Utc>>,
        batch_size: usize,
        offset: usize,
    ) -> Result<(Vec<SourceRecord>, usize), SyncError> {
        let records = self.records.read().await;
        let mut matching: Vec<SourceRecord> = records
            .get(entity_type)
            .into_iter()
            .flat_map(|by_id| by_id.values().cloned())
            .filter(|r| since.map(|cutoff| r.last_modified > cutoff).unwrap_or(true))
            .collect();
        // last_modified DESC, source_id ASC tiebreak (§4.1).
        matching.sort_by(|a, b| b.last_modified.cmp(&a.last_modified).then(a.source_id.cmp(&b.source_id)));
        let total = matching.len();
        let page = matching.into_iter().skip(offset).take(batch_size).collect();
        Ok((page, total))
    }

    async fn get_related(
        &self,
        _parent_entity_type: &str,
        parent_ids: &[String],
        related_entity_types: &[String],
    ) -> Result<BTreeMap<String, Vec<SourceRecord>>, SyncError> {
        let mut result = BTreeMap::new();
        if parent_ids.is_empty() {
            return Ok(result);
        }
        let records = self.records.read().await;
        for related_type in related_entity_types {
            let matches: Vec<SourceRecord> = records
                .get(related_type)
                .into_iter()
                .flat_map(|by_id| by_id.values().cloned())
                .filter(|r| {
                    r.field("property_id")
                        .and_then(|v| v.as_str())
                        .map(|id| parent_ids.iter().any(|p| p == id))
                        .unwrap_or(false)
                })
                .collect();
            result.insert(related_type.clone(), matches);
        }
        Ok(result)
    }

    async fn get_count(&self, entity_type: &str) -> Result<usize, SyncError> {
        let records = self.records.read().await;
        Ok(records.get(entity_type).map(|by_id| by_id.len()).unwrap_or(0))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTargetAdapter {
    // entity_type -> source_id -> (target_id, data)
    records: RwLock<BTreeMap<String, BTreeMap<String, (String, BTreeMap<String, serde_json::Value>)>>>,
}

impl InMemoryTargetAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(
        &self,
        entity_type: &str,
        source_id: &str,
        target_id: &str,
        data: BTreeMap<String, serde_json::Value>,
    ) {
        let mut records = self.records.write().await;
        records
            .entry(entity_type.to_string())
            .or_default()
            .insert(source_id.to_string(), (target_id.to_string(), data));
    }

    pub async fn snapshot(&self, entity_type: &str, source_id: &str) -> Option<BTreeMap<String, serde_json::Value>> {
        let records = self.records.read().await;
        records
            .get(entity_type)
            .and_then(|by_id| by_id.get(source_id))
            .map(|(_, data)| data.clone())
    }
}

#[async_trait]
impl TargetAdapter for InMemoryTargetAdapter {
    async fn connect(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn healthy(&self) -> bool {
        true
    }

    async fn get(&self, entity_type: &str, source_id: &str) -> Result<Option<TargetRecord>, SyncError> {
        let records = self.records.read().await;
        Ok(records.get(entity_type).and_then(|by_id| by_id.get(source_id)).map(|(target_id, data)| TargetRecord {
            target_id: target_id.clone(),
            data: data.clone(),
        }))
    }

    async fn lookup_target_ids(
        &self,
        entity_type: &str,
        source_ids: &[String],
    ) -> Result<BTreeMap<String, String>, SyncError> {
        let records = self.records.read().await;
        let mut result = BTreeMap::new();
        if let Some(by_id) = records.get(entity_type) {
            for source_id in source_ids {
                if let Some((target_id, _)) = by_id.get(source_id) {
                    result.insert(source_id.clone(), target_id.clone());
                }
            }
        }
        Ok(result)
    }

    async fn upsert(&self, entity_type: &str, record: &TransformedRecord) -> Result<(String, UpsertOutcome), SyncError> {
        let mut records = self.records.write().await;
        let by_id = records.entry(entity_type.to_string()).or_default();
        match by_id.get_mut(&record.source_id) {
            Some((target_id, data)) => {
                *data = record.target_data.clone();
                Ok((target_id.clone(), UpsertOutcome::Updated))
            }
            None => {
                let target_id = record.target_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                by_id.insert(record.source_id.clone(), (target_id.clone(), record.target_data.clone()));
                Ok((target_id, UpsertOutcome::Created))
            }
        }
    }

    async fn delete(&self, entity_type: &str, target_id: &str) -> Result<bool, SyncError> {
        let mut records = self.records.write().await;
        if let Some(by_id) = records.get_mut(entity_type) {
            let before = by_id.len();
            by_id.retain(|_, (tid, _)| tid != target_id);
            return Ok(by_id.len() != before);
        }
        Ok(false)
    }
}
