//! ChangeDetector (§4.1): pages through source changes since a watermark.

use cama_sync_adapters::SourceAdapter;
use cama_sync_models::{SourceRecord, SyncError};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

pub struct ChangeDetector {
    source: Arc<dyn SourceAdapter>,
}

impl ChangeDetector {
    pub fn new(source: Arc<dyn SourceAdapter>) -> Self {
        Self { source }
    }

    /// `since = None` means "all". Records with `last_modified == since` are
    /// excluded by the adapter (strict `>`) to guarantee forward progress.
    #[instrument(skip(self))]
    pub async fn get_changed(
        &self,
        entity_type: &str,
        since: Option<DateTime<Utc>>,
        batch_size: usize,
        offset: usize,
    ) -> Result<(Vec<SourceRecord>, usize), SyncError> {
        self.source.get_changed(entity_type, since, batch_size, offset).await
    }

    /// Empty `parent_ids` returns empty maps, never an error.
    #[instrument(skip(self))]
    pub async fn get_related(
        &self,
        parent_entity_type: &str,
        parent_ids: &[String],
        related_entity_types: &[String],
    ) -> Result<BTreeMap<String, Vec<SourceRecord>>, SyncError> {
        if parent_ids.is_empty() {
            return Ok(related_entity_types.iter().map(|t| (t.clone(), Vec::new())).collect());
        }
        self.source.get_related(parent_entity_type, parent_ids, related_entity_types).await
    }

    pub async fn get_count(&self, entity_type: &str) -> Result<usize, SyncError> {
        self.source.get_count(entity_type).await
    }
}

/// A page is final once the adapter returns fewer rows than requested, or
/// returns none at all — the caller stops pagination in either case.
pub fn is_final_page(page_len: usize, batch_size: usize) -> bool {
    page_len == 0 || page_len < batch_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use cama_sync_adapters::InMemorySourceAdapter;

    #[tokio::test]
    async fn empty_page_terminates_pagination() {
        let adapter = Arc::new(InMemorySourceAdapter::new());
        let detector = ChangeDetector::new(adapter);
        let (page, total) = detector.get_changed("property", None, 50, 0).await.unwrap();
        assert!(page.is_empty());
        assert_eq!(total, 0);
        assert!(is_final_page(page.len(), 50));
    }

    #[tokio::test]
    async fn get_related_empty_parents_never_errors() {
        let adapter = Arc::new(InMemorySourceAdapter::new());
        let detector = ChangeDetector::new(adapter);
        let result = detector.get_related("property", &[], &["owner".to_string()]).await.unwrap();
        assert_eq!(result.get("owner").unwrap().len(), 0);
    }
}
