//! SelfHealer (§4.4): corrective mutations keyed by validation error code.

use crate::validator::Validator;
use cama_sync_models::{TransformedRecord, ValidationError};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct HealingAction {
    pub field: Option<String>,
    pub code: String,
    pub description: String,
}

pub struct SelfHealer {
    validator: Validator,
    max_passes: usize,
}

impl SelfHealer {
    pub fn new(validator: Validator) -> Self {
        Self { validator, max_passes: 3 }
    }

    /// Applies one healing strategy per distinct error code present, then
    /// re-validates. Repeats until the record is valid, no action changed
    /// anything, or `max_passes` is exhausted (§4.4).
    #[instrument(skip_all, fields(entity_type = %record.entity_type, source_id = %record.source_id))]
    pub fn heal(
        &self,
        mut record: TransformedRecord,
        errors: &[ValidationError],
        valid_property_ids: &BTreeSet<String>,
    ) -> (TransformedRecord, bool, Vec<HealingAction>) {
        let mut actions = Vec::new();
        let mut current_errors = errors.to_vec();

        for _ in 0..self.max_passes {
            if current_errors.is_empty() {
                return (record, true, actions);
            }

            let mut any_applied = false;
            for error in &current_errors {
                if let Some(action) = apply_strategy(&mut record, error, self.validator.current_year()) {
                    any_applied = true;
                    actions.push(action);
                }
            }

            if !any_applied {
                return (record, false, actions);
            }

            let result = self.validator.validate(&record, valid_property_ids);
            if result.is_valid {
                return (record, true, actions);
            }
            current_errors = result.errors;
        }

        let all_fixed = current_errors.is_empty();
        (record, all_fixed, actions)
    }

    /// Like [`heal`](Self::heal), but over a whole invalid batch. Healed
    /// records carry the actions that fixed them so callers (the engine's
    /// audit trail) can report what changed without re-deriving it.
    pub fn heal_batch(
        &self,
        invalid: Vec<(TransformedRecord, Vec<ValidationError>)>,
        valid_property_ids: &BTreeSet<String>,
    ) -> (Vec<(TransformedRecord, Vec<HealingAction>)>, Vec<(TransformedRecord, Vec<ValidationError>)>) {
        let mut healed = Vec::new();
        let mut still_invalid = Vec::new();
        for (record, errors) in invalid {
            let (record, all_fixed, actions) = self.heal(record, &errors, valid_property_ids);
            if all_fixed {
                healed.push((record, actions));
            } else {
                let result = self.validator.validate(&record, valid_property_ids);
                still_invalid.push((record, result.errors));
            }
        }
        (healed, still_invalid)
    }
}

fn apply_strategy(record: &mut TransformedRecord, error: &ValidationError, current_year: i32) -> Option<HealingAction> {
    match error.code.as_str() {
        "PARCEL_FORMAT" => heal_parcel_format(record, error),
        "ADDRESS_TOO_SHORT" => heal_address_too_short(record, error),
        "STATE_LENGTH" => heal_state_length(record, error),
        "NUMERIC_NONPOS" => heal_numeric_nonpos(record, error),
        "YEAR_OUT_OF_RANGE" => heal_year_out_of_range(record, error, current_year),
        _ => None,
    }
}

fn heal_parcel_format(record: &mut TransformedRecord, error: &ValidationError) -> Option<HealingAction> {
    let field = error.field.as_deref().unwrap_or("parcel_number");
    let current = record.target_data.get(field)?.as_str()?.to_string();
    let cleaned: String = current.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '-').map(|c| c.to_ascii_uppercase()).collect();
    if cleaned.is_empty() {
        return None;
    }
    record.target_data.insert(field.to_string(), Value::String(cleaned.clone()));
    Some(HealingAction {
        field: Some(field.to_string()),
        code: error.code.clone(),
        description: format!("stripped invalid characters, parcel_number now '{cleaned}'"),
    })
}

fn heal_address_too_short(record: &mut TransformedRecord, error: &ValidationError) -> Option<HealingAction> {
    let field = error.field.as_deref().unwrap_or("address");
    let current = record.target_data.get(field).and_then(Value::as_str).unwrap_or("").to_string();
    let healed = match record.target_data.get("city").and_then(Value::as_str) {
        Some(city) if !city.is_empty() => format!("{current}, {city}"),
        _ => "Unknown Address".to_string(),
    };
    record.target_data.insert(field.to_string(), Value::String(healed.clone()));
    Some(HealingAction {
        field: Some(field.to_string()),
        code: error.code.clone(),
        description: format!("address healed to '{healed}'"),
    })
}

fn heal_state_length(record: &mut TransformedRecord, error: &ValidationError) -> Option<HealingAction> {
    let field = error.field.as_deref().unwrap_or("state");
    let current = record.target_data.get(field).and_then(Value::as_str).unwrap_or("").to_uppercase();
    let healed = if current.chars().count() >= 2 { current.chars().take(2).collect() } else { "XX".to_string() };
    record.target_data.insert(field.to_string(), Value::String(healed.clone()));
    Some(HealingAction {
        field: Some(field.to_string()),
        code: error.code.clone(),
        description: format!("state truncated to '{healed}'"),
    })
}

fn heal_numeric_nonpos(record: &mut TransformedRecord, error: &ValidationError) -> Option<HealingAction> {
    let field = error.field.as_deref()?;
    record.target_data.insert(field.to_string(), Value::from(0.01));
    Some(HealingAction {
        field: Some(field.to_string()),
        code: error.code.clone(),
        description: format!("{field} clamped to smallest valid positive value 0.01"),
    })
}

fn heal_year_out_of_range(record: &mut TransformedRecord, error: &ValidationError, current_year: i32) -> Option<HealingAction> {
    let field = error.field.as_deref().unwrap_or("year_built");
    let current = record.target_data.get(field).and_then(Value::as_i64).unwrap_or(1700);
    let clamped = current.clamp(1700, current_year as i64);
    record.target_data.insert(field.to_string(), Value::from(clamped));
    Some(HealingAction {
        field: Some(field.to_string()),
        code: error.code.clone(),
        description: format!("year_built clamped to {clamped}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cama_sync_models::ValidationError;
    use std::collections::BTreeMap;

    fn record_with(field: &str, value: Value) -> TransformedRecord {
        let mut data = BTreeMap::new();
        data.insert(field.to_string(), value);
        TransformedRecord { entity_type: "property".into(), source_id: "P1".into(), target_id: None, target_data: data, notes: vec![] }
    }

    #[test]
    fn heals_parcel_format_by_stripping_invalid_chars() {
        let healer = SelfHealer::new(Validator::new(2026));
        let record = record_with("parcel_number", Value::String("ab-123!@#".into()));
        let error = ValidationError::new(Some("parcel_number"), "PARCEL_FORMAT", "bad format");
        let (healed, fixed, actions) = healer.heal(record, &[error], &BTreeSet::new());
        assert!(fixed);
        assert_eq!(healed.target_data.get("parcel_number").unwrap(), &Value::String("AB-123".into()));
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn heals_state_length_by_truncating() {
        let healer = SelfHealer::new(Validator::new(2026));
        let mut record = record_with("state", Value::String("washington".into()));
        record.target_data.insert("parcel_number".to_string(), Value::String("AB-1".into()));
        record.target_data.insert("year_built".to_string(), Value::from(2000));
        let error = ValidationError::new(Some("state"), "STATE_LENGTH", "too long");
        let (healed, _, _) = healer.heal(record, &[error], &BTreeSet::new());
        assert_eq!(healed.target_data.get("state").unwrap(), &Value::String("WA".into()));
    }

    #[test]
    fn heals_year_out_of_range_by_clamping() {
        let healer = SelfHealer::new(Validator::new(2026));
        let record = record_with("year_built", Value::from(3500));
        let error = ValidationError::new(Some("year_built"), "YEAR_OUT_OF_RANGE", "too far future");
        let (healed, _, _) = healer.heal(record, &[error], &BTreeSet::new());
        assert_eq!(healed.target_data.get("year_built").unwrap(), &Value::from(2026));
    }

    #[test]
    fn unfixable_parcel_leaves_record_invalid() {
        let healer = SelfHealer::new(Validator::new(2026));
        let record = record_with("parcel_number", Value::String("!!!".into()));
        let error = ValidationError::new(Some("parcel_number"), "PARCEL_FORMAT", "bad format");
        let (_, fixed, actions) = healer.heal(record, &[error], &BTreeSet::new());
        assert!(!fixed);
        assert!(actions.is_empty());
    }
}
