//! SyncEngine (§4.10): chains ChangeDetector → Transformer → Validator →
//! SelfHealer → ConflictResolver → TargetAdapter upsert for one job.

use crate::change_detector::{is_final_page, ChangeDetector};
use crate::conflict::ConflictResolver;
use crate::healer::SelfHealer;
use crate::transformer::Transformer;
use crate::validator::Validator;
use cama_sync_adapters::{AuditEventKind, AuditSink, TargetAdapter};
use cama_sync_models::{CancellationToken, FieldMappingCatalog, SyncError, TransformedRecord};
use cama_sync_observability::MetricsSink;
use cama_sync_resilience::SelfHealingOrchestrator;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Dependency order fixed by §4.10: `property` must be processed (and its
/// valid ids collected) before any entity type that references it.
pub const ENTITY_ORDER: &[&str] = &["property", "owner", "value", "structure"];

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct EntityCounters {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub conflicts: u64,
    pub conflicts_resolved: u64,
    pub healed: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    pub per_entity: std::collections::BTreeMap<String, EntityCounters>,
    pub new_watermark: Option<DateTime<Utc>>,
}

impl SyncOutcome {
    fn counters_for(&mut self, entity_type: &str) -> &mut EntityCounters {
        self.per_entity.entry(entity_type.to_string()).or_default()
    }
}

pub struct SyncEngine {
    change_detector: ChangeDetector,
    transformer: Transformer,
    validator: Validator,
    healer: SelfHealer,
    target: Arc<dyn TargetAdapter>,
    orchestrator: Arc<SelfHealingOrchestrator>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<dyn MetricsSink>,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        change_detector: ChangeDetector,
        transformer: Transformer,
        validator: Validator,
        healer: SelfHealer,
        target: Arc<dyn TargetAdapter>,
        orchestrator: Arc<SelfHealingOrchestrator>,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self { change_detector, transformer, validator, healer, target, orchestrator, audit, metrics }
    }

    /// Runs one job to completion. `since = None` is a full sync; `Some`
    /// is incremental from that cutoff. The job's own start time is
    /// returned as `new_watermark` on full success, for the caller to
    /// persist (§4.10 step 3). Every stage emits audit events against
    /// `job_id` (§2 "every stage emits audit + metric events").
    ///
    /// `resolver` is supplied fresh per call, same as `mapping` — both are
    /// read from `CatalogStore` by the caller right before dispatch, so a
    /// `CatalogStore::reload()` takes effect on the next job rather than
    /// only at process startup.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn run_job(
        &self,
        job_id: Uuid,
        since: Option<DateTime<Utc>>,
        mapping: &FieldMappingCatalog,
        resolver: &ConflictResolver,
        entity_types: &[String],
        batch_size: usize,
        cancellation: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        let job_start = Utc::now();
        let mut outcome = SyncOutcome::default();
        let mut valid_property_ids: BTreeSet<String> = BTreeSet::new();

        let ordered: Vec<&String> = ENTITY_ORDER
            .iter()
            .filter_map(|canonical| entity_types.iter().find(|e| e.as_str() == *canonical))
            .collect();

        for entity_type in ordered {
            if cancellation.is_cancelled() {
                break;
            }
            self.run_entity(job_id, entity_type, since, mapping, resolver, batch_size, &mut valid_property_ids, &mut outcome, cancellation)
                .await?;
        }

        if !cancellation.is_cancelled() {
            outcome.new_watermark = Some(job_start);
        }
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_entity(
        &self,
        job_id: Uuid,
        entity_type: &str,
        since: Option<DateTime<Utc>>,
        mapping_catalog: &FieldMappingCatalog,
        resolver: &ConflictResolver,
        batch_size: usize,
        valid_property_ids: &mut BTreeSet<String>,
        outcome: &mut SyncOutcome,
        cancellation: &CancellationToken,
    ) -> Result<(), SyncError> {
        let Some(mapping) = mapping_catalog.for_entity(entity_type) else {
            warn!(entity_type, "no field mapping registered, skipping entity type");
            return Ok(());
        };

        let mut offset = 0usize;
        loop {
            if cancellation.is_cancelled() {
                return Ok(());
            }

            let (page, _total) = self.change_detector.get_changed(entity_type, since, batch_size, offset).await?;
            let page_len = page.len();
            if page_len == 0 {
                break;
            }

            let source_ids: Vec<String> = page.iter().map(|r| r.source_id.clone()).collect();
            let target_ids = self.target.lookup_target_ids(entity_type, &source_ids).await?;

            // "property" records never carry a parent-reference field, so the
            // lookup against the target store is only needed for entity types
            // that do (owner/value/structure).
            let id_map = if entity_type == "property" {
                std::collections::BTreeMap::new()
            } else {
                let property_source_ids: Vec<String> = valid_property_ids.iter().cloned().collect();
                self.target.lookup_target_ids("property", &property_source_ids).await?
            };
            let transformed = self.transformer.batch_transform(&page, mapping, &target_ids, &id_map);

            // `id_map`'s values are what the transformer just wrote into any
            // `is_parent_reference` field, so the validator and healer must
            // check foreign references against those target ids, not the
            // source ids in `valid_property_ids`.
            let valid_property_target_ids: BTreeSet<String> = id_map.values().cloned().collect();
            let (valid, invalid) = self.validator.batch_validate(&transformed, &valid_property_target_ids);

            let invalid_with_errors: Vec<(TransformedRecord, Vec<cama_sync_models::ValidationError>)> =
                invalid.into_iter().map(|(record, result)| (record, result.errors)).collect();
            let invalid_count = invalid_with_errors.len();
            let (healed, still_invalid) = self.healer.heal_batch(invalid_with_errors, &valid_property_target_ids);

            let counters = outcome.counters_for(entity_type);
            counters.processed += page_len as u64;
            counters.failed += still_invalid.len() as u64;
            counters.healed += invalid_count.saturating_sub(still_invalid.len()) as u64;

            let healed_this_page = invalid_count.saturating_sub(still_invalid.len());
            self.metrics.counter_inc("sync_records_processed_total", &[("entity_type", entity_type)], page_len as f64);
            self.metrics.counter_inc("sync_records_healed_total", &[("entity_type", entity_type)], healed_this_page as f64);
            self.metrics.counter_inc("sync_records_rejected_total", &[("entity_type", entity_type)], still_invalid.len() as f64);

            for (record, actions) in &healed {
                for action in actions {
                    let payload = serde_json::json!({
                        "entity_type": entity_type,
                        "source_id": record.source_id,
                        "field": action.field,
                        "code": action.code,
                        "description": action.description,
                    });
                    self.audit.record_event(job_id, AuditEventKind::RecordHealed, payload).await?;
                }
            }

            let mut survivors: Vec<TransformedRecord> = valid;
            survivors.extend(healed.into_iter().map(|(record, _)| record));

            self.audit
                .record_event(
                    job_id,
                    AuditEventKind::BatchProcessed,
                    serde_json::json!({ "entity_type": entity_type, "offset": offset, "count": page_len }),
                )
                .await?;

            for record in survivors {
                if cancellation.is_cancelled() {
                    return Ok(());
                }

                let existing = self.target.get(entity_type, &record.source_id).await?;
                let (resolved, conflicts) = resolver.resolve(record, existing.as_ref().map(|t| &t.data));

                let counters = outcome.counters_for(entity_type);
                counters.conflicts += conflicts.len() as u64;
                counters.conflicts_resolved += conflicts.iter().filter(|c| c.resolved_value.is_some()).count() as u64;

                if !conflicts.is_empty() {
                    self.metrics.counter_inc("sync_conflicts_detected_total", &[("entity_type", entity_type)], conflicts.len() as f64);
                }

                for conflict in &conflicts {
                    self.audit.record_conflict(job_id, conflict).await?;
                    self.audit
                        .record_event(
                            job_id,
                            AuditEventKind::ConflictDetected,
                            serde_json::json!({ "entity_type": conflict.entity_type, "source_id": conflict.source_id, "field": conflict.field }),
                        )
                        .await?;
                    if conflict.resolved_value.is_some() {
                        self.audit
                            .record_event(
                                job_id,
                                AuditEventKind::ConflictResolved,
                                serde_json::json!({ "entity_type": conflict.entity_type, "source_id": conflict.source_id, "field": conflict.field }),
                            )
                            .await?;
                    }
                }

                let target = self.target.clone();
                let entity_type_owned = entity_type.to_string();
                let resolved_for_upsert = resolved.clone();
                let upsert_result = self
                    .orchestrator
                    .execute_with_resilience(Some("target"), Some("target"), move || {
                        let target = target.clone();
                        let entity_type_owned = entity_type_owned.clone();
                        let resolved_for_upsert = resolved_for_upsert.clone();
                        async move { target.upsert(&entity_type_owned, &resolved_for_upsert).await }
                    })
                    .await;

                let counters = outcome.counters_for(entity_type);
                match upsert_result {
                    Ok((_target_id, _)) => {
                        counters.succeeded += 1;
                        self.metrics.counter_inc("sync_upserts_total", &[("entity_type", entity_type), ("outcome", "success")], 1.0);
                        if entity_type == "property" {
                            valid_property_ids.insert(resolved.source_id.clone());
                        }
                    }
                    // Sustained target unavailability short-circuits the rest
                    // of this entity's batches; the job ends FAILED (§4.10).
                    Err(err @ SyncError::RemoteUnavailable(_)) => {
                        counters.failed += 1;
                        self.metrics.counter_inc("sync_upserts_total", &[("entity_type", entity_type), ("outcome", "failure")], 1.0);
                        return Err(err);
                    }
                    Err(_) => {
                        counters.failed += 1;
                        self.metrics.counter_inc("sync_upserts_total", &[("entity_type", entity_type), ("outcome", "failure")], 1.0);
                    }
                }
            }

            offset += page_len;
            if is_final_page(page_len, batch_size) {
                break;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cama_sync_adapters::{InMemoryAuditSink, InMemorySourceAdapter, InMemoryTargetAdapter};
    use cama_sync_models::{EntityFieldMapping, FieldMapping, SourceRecord};
    use cama_sync_observability::PrometheusMetricsSink;
    use serde_json::Value;
    use std::collections::BTreeMap;

    fn property_mapping() -> FieldMappingCatalog {
        let mut entities = BTreeMap::new();
        entities.insert(
            "property".to_string(),
            EntityFieldMapping {
                entity_type: "property".into(),
                fields: vec![
                    FieldMapping { source_field: "parcel".into(), target_field: "parcel_number".into(), transforms: vec![], default: None, is_parent_reference: false },
                    FieldMapping { source_field: "addr".into(), target_field: "address".into(), transforms: vec![], default: None, is_parent_reference: false },
                    FieldMapping { source_field: "st".into(), target_field: "state".into(), transforms: vec![], default: None, is_parent_reference: false },
                    FieldMapping { source_field: "year".into(), target_field: "year_built".into(), transforms: vec![], default: None, is_parent_reference: false },
                ],
            },
        );
        FieldMappingCatalog { entities }
    }

    fn engine_with_empty_source() -> (SyncEngine, Arc<InMemorySourceAdapter>, Arc<InMemoryTargetAdapter>, Arc<InMemoryAuditSink>) {
        let source = Arc::new(InMemorySourceAdapter::new());
        let target = Arc::new(InMemoryTargetAdapter::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let orchestrator = Arc::new(SelfHealingOrchestrator::new());
        let engine = SyncEngine::new(
            ChangeDetector::new(source.clone()),
            Transformer::new(),
            Validator::new(2026),
            SelfHealer::new(Validator::new(2026)),
            target.clone(),
            orchestrator,
            audit.clone(),
            Arc::new(PrometheusMetricsSink::new()),
        );
        (engine, source, target, audit)
    }

    #[tokio::test]
    async fn full_sync_upserts_valid_property_and_advances_watermark() {
        let (engine, source, target, audit) = engine_with_empty_source();
        let mut payload = BTreeMap::new();
        payload.insert("parcel".to_string(), Value::String("AB-123".into()));
        payload.insert("addr".to_string(), Value::String("1 Main Street".into()));
        payload.insert("st".to_string(), Value::String("WA".into()));
        payload.insert("year".to_string(), Value::from(1998));
        source
            .seed(SourceRecord { entity_type: "property".into(), source_id: "P1".into(), payload, last_modified: Utc::now() })
            .await;

        let mapping = property_mapping();
        let cancellation = CancellationToken::new();
        let job_id = Uuid::new_v4();
        let outcome = engine
            .run_job(job_id, None, &mapping, &ConflictResolver::new(vec![]), &["property".to_string()], 50, &cancellation)
            .await
            .unwrap();

        assert!(outcome.new_watermark.is_some());
        let counters = outcome.per_entity.get("property").unwrap();
        assert_eq!(counters.processed, 1);
        assert_eq!(counters.succeeded, 1);
        assert_eq!(counters.failed, 0);
        assert!(target.snapshot("property", "P1").await.is_some());

        let events = audit.events_for(job_id).await;
        assert!(events.iter().any(|(kind, _)| *kind == AuditEventKind::BatchProcessed));
    }

    #[tokio::test]
    async fn unfixable_record_is_counted_failed_without_aborting_job() {
        let (engine, source, _target, _audit) = engine_with_empty_source();
        let mut payload = BTreeMap::new();
        payload.insert("parcel".to_string(), Value::String("!!!".into()));
        payload.insert("addr".to_string(), Value::String("1 Main Street".into()));
        payload.insert("st".to_string(), Value::String("WA".into()));
        payload.insert("year".to_string(), Value::from(1998));
        source
            .seed(SourceRecord { entity_type: "property".into(), source_id: "P1".into(), payload, last_modified: Utc::now() })
            .await;

        let mapping = property_mapping();
        let cancellation = CancellationToken::new();
        let job_id = Uuid::new_v4();
        let outcome = engine
            .run_job(job_id, None, &mapping, &ConflictResolver::new(vec![]), &["property".to_string()], 50, &cancellation)
            .await
            .unwrap();

        let counters = outcome.per_entity.get("property").unwrap();
        assert_eq!(counters.failed, 1);
        assert_eq!(counters.succeeded, 0);
    }

    #[tokio::test]
    async fn conflicting_field_emits_conflict_audit_events() {
        let (engine, source, target, audit) = engine_with_empty_source();
        target
            .upsert(
                "property",
                &TransformedRecord {
                    entity_type: "property".into(),
                    source_id: "P1".into(),
                    target_id: None,
                    target_data: {
                        let mut data = BTreeMap::new();
                        data.insert("address".to_string(), Value::String("2 Old St".into()));
                        data
                    },
                    notes: vec![],
                },
            )
            .await
            .unwrap();

        let mut payload = BTreeMap::new();
        payload.insert("parcel".to_string(), Value::String("AB-123".into()));
        payload.insert("addr".to_string(), Value::String("1 Main Street".into()));
        payload.insert("st".to_string(), Value::String("WA".into()));
        payload.insert("year".to_string(), Value::from(1998));
        source
            .seed(SourceRecord { entity_type: "property".into(), source_id: "P1".into(), payload, last_modified: Utc::now() })
            .await;

        let mapping = property_mapping();
        let cancellation = CancellationToken::new();
        let job_id = Uuid::new_v4();
        engine
            .run_job(job_id, None, &mapping, &ConflictResolver::new(vec![]), &["property".to_string()], 50, &cancellation)
            .await
            .unwrap();

        let events = audit.events_for(job_id).await;
        assert!(events.iter().any(|(kind, _)| *kind == AuditEventKind::ConflictDetected));
        assert!(events.iter().any(|(kind, _)| *kind == AuditEventKind::ConflictResolved));
    }

    fn property_and_owner_mapping() -> FieldMappingCatalog {
        let mut catalog = property_mapping();
        catalog.entities.insert(
            "owner".to_string(),
            EntityFieldMapping {
                entity_type: "owner".into(),
                fields: vec![
                    FieldMapping { source_field: "name".into(), target_field: "owner_name".into(), transforms: vec![], default: None, is_parent_reference: false },
                    FieldMapping {
                        source_field: "property_id".into(),
                        target_field: "property_id".into(),
                        transforms: vec![],
                        default: None,
                        is_parent_reference: true,
                    },
                ],
            },
        );
        catalog
    }

    #[tokio::test]
    async fn owner_record_resolves_property_foreign_key_to_target_id() {
        let (engine, source, target, _audit) = engine_with_empty_source();
        let mut property_payload = BTreeMap::new();
        property_payload.insert("parcel".to_string(), Value::String("AB-123".into()));
        property_payload.insert("addr".to_string(), Value::String("1 Main Street".into()));
        property_payload.insert("st".to_string(), Value::String("WA".into()));
        property_payload.insert("year".to_string(), Value::from(1998));
        source
            .seed(SourceRecord { entity_type: "property".into(), source_id: "P1".into(), payload: property_payload, last_modified: Utc::now() })
            .await;

        let mut owner_payload = BTreeMap::new();
        owner_payload.insert("name".to_string(), Value::String("Jane Doe".into()));
        owner_payload.insert("property_id".to_string(), Value::String("P1".into()));
        source
            .seed(SourceRecord { entity_type: "owner".into(), source_id: "O1".into(), payload: owner_payload, last_modified: Utc::now() })
            .await;

        let mapping = property_and_owner_mapping();
        let cancellation = CancellationToken::new();
        let job_id = Uuid::new_v4();
        let outcome = engine
            .run_job(job_id, None, &mapping, &ConflictResolver::new(vec![]), &["property".to_string(), "owner".to_string()], 50, &cancellation)
            .await
            .unwrap();

        let property_counters = outcome.per_entity.get("property").unwrap();
        assert_eq!(property_counters.succeeded, 1);
        let owner_counters = outcome.per_entity.get("owner").unwrap();
        assert_eq!(owner_counters.succeeded, 1, "owner's property_id should resolve via the real target id, not fail REF_MISSING");

        let owner_data = target.snapshot("owner", "O1").await.unwrap();
        let resolved_property_id = owner_data.get("property_id").and_then(Value::as_str).unwrap();
        assert_ne!(resolved_property_id, "P1", "property_id must be the resolved target id, not the source id");
    }
}
