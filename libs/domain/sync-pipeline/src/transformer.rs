//! Transformer (§4.2): maps `SourceRecord` to `TransformedRecord` via the
//! field-mapping catalog. Ported from `core/transformer.py`'s named
//! transform registry.

use cama_sync_models::{EntityFieldMapping, FieldMapping, SourceRecord, TransformSpec, TransformedRecord};
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::instrument;

pub struct Transformer;

impl Transformer {
    pub fn new() -> Self {
        Self
    }

    /// `id_map` resolves a source-side parent id to its target id for any
    /// field flagged `is_parent_reference`. Looked up once per batch by the
    /// caller (`SyncEngine`), not per record.
    #[instrument(skip_all, fields(entity_type = %mapping.entity_type, source_id = %record.source_id))]
    pub fn transform(
        &self,
        record: &SourceRecord,
        mapping: &EntityFieldMapping,
        target_id: Option<String>,
        id_map: &BTreeMap<String, String>,
    ) -> TransformedRecord {
        let mut out = TransformedRecord::new(mapping.entity_type.clone(), record.source_id.clone());
        out.target_id = target_id;

        for field in &mapping.fields {
            self.apply_field(record, field, id_map, &mut out);
        }
        out
    }

    pub fn batch_transform(
        &self,
        records: &[SourceRecord],
        mapping: &EntityFieldMapping,
        target_ids: &BTreeMap<String, String>,
        id_map: &BTreeMap<String, String>,
    ) -> Vec<TransformedRecord> {
        records
            .iter()
            .map(|r| self.transform(r, mapping, target_ids.get(&r.source_id).cloned(), id_map))
            .collect()
    }

    fn apply_field(
        &self,
        record: &SourceRecord,
        field: &FieldMapping,
        id_map: &BTreeMap<String, String>,
        out: &mut TransformedRecord,
    ) {
        if field.is_parent_reference {
            let Some(source_value) = record.field(&field.source_field).and_then(Value::as_str) else {
                out.note(format!("{}: missing parent reference field, dropped", field.target_field));
                return;
            };
            match id_map.get(source_value) {
                Some(target_id) => {
                    out.target_data.insert(field.target_field.clone(), Value::String(target_id.clone()));
                }
                None => {
                    out.note(format!(
                        "{}: unresolved parent reference '{}', field dropped (validator may reject downstream)",
                        field.target_field, source_value
                    ));
                }
            }
            return;
        }

        let raw = record.field(&field.source_field).cloned();
        let value = match raw {
            None | Some(Value::Null) => match &field.default {
                Some(default) => default.clone(),
                None => {
                    if field.transforms.is_empty() {
                        return;
                    }
                    zero_value(&field.transforms[0])
                }
            },
            Some(v) => v,
        };

        let transformed = self.apply_transforms(value, &field.transforms, out);
        out.target_data.insert(field.target_field.clone(), transformed);
    }

    /// Each transform in the chain runs in order. A transform failure keeps
    /// the pre-transform value and appends a note; the whole record is never
    /// discarded (§4.2).
    fn apply_transforms(&self, mut value: Value, transforms: &[TransformSpec], out: &mut TransformedRecord) -> Value {
        for spec in transforms {
            match apply_one(&value, spec) {
                Ok(next) => value = next,
                Err(reason) => {
                    out.note(format!("{}: {} (kept prior value)", spec.name(), reason));
                }
            }
        }
        value
    }
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new()
    }
}

fn zero_value(spec: &TransformSpec) -> Value {
    match spec {
        TransformSpec::ToInt => Value::from(0),
        TransformSpec::ToFloat => Value::from(0.0),
        TransformSpec::ToBool | TransformSpec::InvertBool => Value::Bool(false),
        _ => Value::String(String::new()),
    }
}

fn apply_one(value: &Value, spec: &TransformSpec) -> Result<Value, String> {
    match spec {
        TransformSpec::Uppercase => as_str(value).map(|s| Value::String(s.to_uppercase())),
        TransformSpec::Lowercase => as_str(value).map(|s| Value::String(s.to_lowercase())),
        TransformSpec::Capitalize => as_str(value).map(|s| Value::String(capitalize(s))),
        TransformSpec::Trim => as_str(value).map(|s| Value::String(s.trim().to_string())),
        TransformSpec::ToInt => to_number(value).map(|n| Value::from(n as i64)),
        TransformSpec::ToFloat => to_number(value).map(Value::from),
        TransformSpec::ToBool => Ok(Value::Bool(truthy(value))),
        TransformSpec::InvertBool => Ok(Value::Bool(!truthy(value))),
        TransformSpec::FormatDate(fmt) => as_str(value).and_then(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(|d| Value::String(d.format(fmt).to_string()))
                .map_err(|e| e.to_string())
        }),
        TransformSpec::JoinFields(sep) => match value {
            Value::Array(items) => Ok(Value::String(
                items.iter().map(value_to_string).collect::<Vec<_>>().join(sep),
            )),
            other => as_str(other).map(|s| Value::String(s.to_string())),
        },
        TransformSpec::SplitField(sep) => as_str(value).map(|s| {
            Value::Array(s.split(sep.as_str()).map(|part| Value::String(part.to_string())).collect())
        }),
        TransformSpec::Unknown(name) => Err(format!("unrecognized transform '{name}', skipped")),
    }
}

fn as_str(value: &Value) -> Result<&str, String> {
    value.as_str().ok_or_else(|| format!("expected string, got {value}"))
}

fn to_number(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| "non-finite number".to_string()),
        Value::String(s) => s.trim().parse::<f64>().map_err(|e| e.to_string()),
        other => Err(format!("cannot coerce {other} to a number")),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => matches!(s.to_lowercase().as_str(), "true" | "1" | "yes"),
        Value::Null => false,
        _ => true,
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cama_sync_models::FieldMapping;
    use chrono::Utc;

    fn mapping(fields: Vec<FieldMapping>) -> EntityFieldMapping {
        EntityFieldMapping { entity_type: "property".into(), fields }
    }

    fn record(payload: BTreeMap<String, Value>) -> SourceRecord {
        SourceRecord { entity_type: "property".into(), source_id: "P1".into(), payload, last_modified: Utc::now() }
    }

    #[test]
    fn missing_field_without_default_is_omitted() {
        let transformer = Transformer::new();
        let mapping = mapping(vec![FieldMapping {
            source_field: "missing".into(),
            target_field: "out".into(),
            transforms: vec![],
            default: None,
            is_parent_reference: false,
        }]);
        let result = transformer.transform(&record(BTreeMap::new()), &mapping, None, &BTreeMap::new());
        assert!(!result.target_data.contains_key("out"));
    }

    #[test]
    fn failed_transform_keeps_original_value_and_notes() {
        let transformer = Transformer::new();
        let mapping = mapping(vec![FieldMapping {
            source_field: "parcel".into(),
            target_field: "parcel_number".into(),
            transforms: vec![TransformSpec::ToInt],
            default: None,
            is_parent_reference: false,
        }]);
        let mut payload = BTreeMap::new();
        payload.insert("parcel".to_string(), Value::String("AB-123".into()));
        let result = transformer.transform(&record(payload), &mapping, None, &BTreeMap::new());
        assert_eq!(result.target_data.get("parcel_number").unwrap(), &Value::String("AB-123".into()));
        assert_eq!(result.notes.len(), 1);
    }

    #[test]
    fn unresolved_parent_reference_drops_field_with_note() {
        let transformer = Transformer::new();
        let mapping = mapping(vec![FieldMapping {
            source_field: "property_source_id".into(),
            target_field: "property_id".into(),
            transforms: vec![],
            default: None,
            is_parent_reference: true,
        }]);
        let mut payload = BTreeMap::new();
        payload.insert("property_source_id".to_string(), Value::String("P-UNRESOLVED".into()));
        let result = transformer.transform(&record(payload), &mapping, None, &BTreeMap::new());
        assert!(!result.target_data.contains_key("property_id"));
        assert_eq!(result.notes.len(), 1);
    }
}
