//! Validator (§4.3): per-entity business rules producing a `ValidationResult`.
//! Ported from `components/validator.py`.

use cama_sync_models::{TransformedRecord, ValidationError, ValidationResult};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::instrument;

fn parcel_number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z0-9-]+$").expect("static pattern is valid"))
}

pub struct Validator {
    current_year: i32,
}

impl Validator {
    pub fn new(current_year: i32) -> Self {
        Self { current_year }
    }

    pub fn current_year(&self) -> i32 {
        self.current_year
    }

    /// `valid_property_ids` is the set of `property` *target* ids already
    /// resolved for this batch (the same ids the transformer just wrote into
    /// any `is_parent_reference` field), used to check foreign references
    /// from `owner`/`value`/`structure` records (§4.3).
    #[instrument(skip_all, fields(entity_type = %record.entity_type, source_id = %record.source_id))]
    pub fn validate(&self, record: &TransformedRecord, valid_property_ids: &BTreeSet<String>) -> ValidationResult {
        let mut errors = Vec::new();
        match record.entity_type.as_str() {
            "property" => self.validate_property(record, &mut errors),
            "owner" => self.validate_foreign_ref(record, valid_property_ids, &mut errors),
            "value" => {
                self.validate_foreign_ref(record, valid_property_ids, &mut errors);
                self.validate_value_consistency(record, &mut errors);
            }
            "structure" => {
                self.validate_foreign_ref(record, valid_property_ids, &mut errors);
                self.validate_year_built(record, &mut errors);
            }
            _ => {}
        }
        ValidationResult::invalid(errors)
    }

    pub fn batch_validate(
        &self,
        records: &[TransformedRecord],
        valid_property_ids: &BTreeSet<String>,
    ) -> (Vec<TransformedRecord>, Vec<(TransformedRecord, ValidationResult)>) {
        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        for record in records {
            let result = self.validate(record, valid_property_ids);
            if result.is_valid {
                valid.push(record.clone());
            } else {
                invalid.push((record.clone(), result));
            }
        }
        (valid, invalid)
    }

    fn validate_property(&self, record: &TransformedRecord, errors: &mut Vec<ValidationError>) {
        match record.target_data.get("parcel_number").and_then(Value::as_str) {
            Some(parcel) if parcel_number_pattern().is_match(parcel) => {}
            Some(_) => errors.push(ValidationError::new(
                Some("parcel_number"),
                "PARCEL_FORMAT",
                "parcel_number must match ^[A-Z0-9-]+$",
            )),
            None => errors.push(ValidationError::new(Some("parcel_number"), "PARCEL_FORMAT", "parcel_number is required")),
        }

        if let Some(address) = record.target_data.get("address").and_then(Value::as_str) {
            if address.len() < 5 {
                errors.push(ValidationError::new(Some("address"), "ADDRESS_TOO_SHORT", "address must be at least 5 characters"));
            }
        }

        if let Some(state) = record.target_data.get("state").and_then(Value::as_str) {
            if state.len() != 2 {
                errors.push(ValidationError::new(Some("state"), "STATE_LENGTH", "state must be a 2-letter code"));
            }
        }

        if let Some(acreage) = record.target_data.get("acreage").and_then(Value::as_f64) {
            if acreage <= 0.0 {
                errors.push(ValidationError::new(Some("acreage"), "NUMERIC_NONPOS", "acreage must be greater than 0"));
            }
        }

        self.validate_year_built(record, errors);
    }

    fn validate_year_built(&self, record: &TransformedRecord, errors: &mut Vec<ValidationError>) {
        if let Some(year) = record.target_data.get("year_built").and_then(Value::as_i64) {
            if year < 1700 || year > self.current_year as i64 {
                errors.push(ValidationError::new(
                    Some("year_built"),
                    "YEAR_OUT_OF_RANGE",
                    format!("year_built must be within [1700, {}]", self.current_year),
                ));
            }
        }
    }

    fn validate_foreign_ref(&self, record: &TransformedRecord, valid_property_ids: &BTreeSet<String>, errors: &mut Vec<ValidationError>) {
        match record.target_data.get("property_id").and_then(Value::as_str) {
            Some(id) if valid_property_ids.contains(id) => {}
            _ => errors.push(ValidationError::new(
                Some("property_id"),
                "REF_MISSING",
                "property_id must resolve to a validated property in this batch",
            )),
        }
    }

    fn validate_value_consistency(&self, record: &TransformedRecord, errors: &mut Vec<ValidationError>) {
        let land = record.target_data.get("land_value").and_then(Value::as_f64);
        let improvement = record.target_data.get("improvement_value").and_then(Value::as_f64);
        let market = record.target_data.get("market_value").and_then(Value::as_f64);

        for (field, value) in [("land_value", land), ("improvement_value", improvement), ("market_value", market)] {
            if let Some(v) = value {
                if v < 0.0 {
                    errors.push(ValidationError::new(Some(field), "NUMERIC_NONPOS", format!("{field} must be non-negative")));
                }
            }
        }

        if let (Some(land), Some(improvement), Some(market)) = (land, improvement, market) {
            if (land + improvement - market).abs() > 1.0 {
                errors.push(ValidationError::new(
                    None,
                    "VALUE_INCONSISTENT",
                    "land_value + improvement_value must equal market_value within a tolerance of 1.0",
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn property(parcel: &str, state: &str, year_built: i64) -> TransformedRecord {
        let mut data = BTreeMap::new();
        data.insert("parcel_number".to_string(), Value::String(parcel.into()));
        data.insert("state".to_string(), Value::String(state.into()));
        data.insert("year_built".to_string(), Value::from(year_built));
        TransformedRecord { entity_type: "property".into(), source_id: "P1".into(), target_id: None, target_data: data, notes: vec![] }
    }

    #[test]
    fn validator_is_order_independent() {
        let validator = Validator::new(2026);
        let record = property("AB$123!", "WASHINGTON", 3000);
        let first = validator.validate(&record, &BTreeSet::new());
        let second = validator.validate(&record, &BTreeSet::new());
        assert_eq!(first.errors, second.errors);
        assert_eq!(first.errors.len(), 3);
    }

    #[test]
    fn valid_property_passes() {
        let validator = Validator::new(2026);
        let record = property("AB123", "WA", 1998);
        let result = validator.validate(&record, &BTreeSet::new());
        assert!(result.is_valid);
    }

    #[test]
    fn value_consistency_tolerance() {
        let validator = Validator::new(2026);
        let mut data = BTreeMap::new();
        data.insert("property_id".to_string(), Value::String("P1".into()));
        data.insert("land_value".to_string(), Value::from(100.0));
        data.insert("improvement_value".to_string(), Value::from(50.5));
        data.insert("market_value".to_string(), Value::from(150.0));
        let record = TransformedRecord { entity_type: "value".into(), source_id: "V1".into(), target_id: None, target_data: data, notes: vec![] };
        let mut valid_ids = BTreeSet::new();
        valid_ids.insert("P1".to_string());
        let result = validator.validate(&record, &valid_ids);
        assert!(result.is_valid, "{:?}", result.errors);
    }
}
