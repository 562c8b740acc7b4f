//! Source/target adapter contracts plus an in-memory reference pair.

pub mod audit;
pub mod errors;
pub mod memory;
pub mod traits;

pub use audit::{AuditEventKind, AuditSink, InMemoryAuditSink};
pub use errors::AdapterError;
pub use memory::{InMemorySourceAdapter, InMemoryTargetAdapter};
pub use traits::{SourceAdapter, TargetAdapter, TargetRecord, UpsertOutcome};

#[cfg(test)]
mod tests {
    use super::*;
    use cama_sync_models::SourceRecord;
    use chrono::Utc;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn get_changed_excludes_since_and_orders_stably() {
        let adapter = InMemorySourceAdapter::new();
        let now = Utc::now();
        adapter
            .seed(SourceRecord {
                entity_type: "property".into(),
                source_id: "P1".into(),
                payload: BTreeMap::new(),
                last_modified: now,
            })
            .await;
        adapter
            .seed(SourceRecord {
                entity_type: "property".into(),
                source_id: "P2".into(),
                payload: BTreeMap::new(),
                last_modified: now,
            })
            .await;

        let (page, total) = adapter.get_changed("property", Some(now), 10, 0).await.unwrap();
        assert_eq!(total, 0);
        assert!(page.is_empty());

        let (page, total) = adapter
            .get_changed("property", Some(now - chrono::Duration::seconds(1)), 10, 0)
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(page[0].source_id, "P1");
        assert_eq!(page[1].source_id, "P2");
    }

    #[tokio::test]
    async fn get_related_with_empty_parents_never_errors() {
        let adapter = InMemorySourceAdapter::new();
        let result = adapter.get_related("property", &[], &["owner".to_string()]).await.unwrap();
        assert!(result.get("owner").unwrap().is_empty());
    }
}
