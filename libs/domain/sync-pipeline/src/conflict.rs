//! ConflictResolver (§4.5): per-field divergence detection and resolution
//! between a transformed record and any existing target record.

use cama_sync_models::{Conflict, ResolutionRule, ResolutionStrategy, TransformedRecord, ValuePredicate};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::instrument;

/// Field-class defaults applied when no explicit rule matches (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldClass {
    Address,
    Valuation,
    Structural,
    Other,
}

fn classify(field: &str) -> FieldClass {
    match field {
        "address" | "city" | "state" | "zip" | "owner_name" | "mailing_address" => FieldClass::Address,
        "land_value" | "improvement_value" | "market_value" | "assessed_value" => FieldClass::Valuation,
        "year_built" | "square_footage" | "bedrooms" | "bathrooms" | "acreage" => FieldClass::Structural,
        _ => FieldClass::Other,
    }
}

fn default_strategy_for(field: &str) -> ResolutionStrategy {
    match classify(field) {
        FieldClass::Address => ResolutionStrategy::SourceWins,
        FieldClass::Valuation => ResolutionStrategy::TargetWins,
        FieldClass::Structural => ResolutionStrategy::Merge,
        FieldClass::Other => ResolutionStrategy::SourceWins,
    }
}

pub struct ConflictResolver {
    /// Keyed by `(entity_type, field)`.
    rules: BTreeMap<(String, String), ResolutionRule>,
}

impl ConflictResolver {
    pub fn new(rules: Vec<ResolutionRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|r| ((r.entity_type.clone(), r.field.clone()), r))
            .collect();
        Self { rules }
    }

    /// Compares `transformed` against `existing_target` (absent for a fresh
    /// insert, in which case there is nothing to reconcile). Returns the
    /// resolved record plus the list of conflicts found, each carrying its
    /// chosen strategy and resolved value for audit.
    #[instrument(skip_all, fields(entity_type = %transformed.entity_type, source_id = %transformed.source_id))]
    pub fn resolve(
        &self,
        mut transformed: TransformedRecord,
        existing_target: Option<&BTreeMap<String, Value>>,
    ) -> (TransformedRecord, Vec<Conflict>) {
        let Some(existing) = existing_target else {
            return (transformed, Vec::new());
        };

        let mut conflicts = Vec::new();
        for (field, source_value) in transformed.target_data.clone() {
            let Some(target_value) = existing.get(&field) else {
                continue;
            };
            if source_value.is_null() || target_value.is_null() || source_value == *target_value {
                continue;
            }

            let strategy = self.strategy_for(&transformed.entity_type, &field, &source_value, target_value);
            let resolved_value = apply_strategy(strategy, &source_value, target_value);

            if let Some(value) = &resolved_value {
                transformed.target_data.insert(field.clone(), value.clone());
            } else {
                transformed.target_data.insert(field.clone(), target_value.clone());
            }

            conflicts.push(Conflict {
                source_id: transformed.source_id.clone(),
                entity_type: transformed.entity_type.clone(),
                field,
                source_value,
                target_value: target_value.clone(),
                resolution: Some(strategy),
                resolved_value,
            });
        }

        (transformed, conflicts)
    }

    fn strategy_for(&self, entity_type: &str, field: &str, source_value: &Value, target_value: &Value) -> ResolutionStrategy {
        if let Some(rule) = self.rules.get(&(entity_type.to_string(), field.to_string())) {
            for (predicate, strategy) in &rule.overrides {
                let matches = match predicate {
                    ValuePredicate::SourceValueIsNull => source_value.is_null(),
                    ValuePredicate::TargetValueIsNull => target_value.is_null(),
                };
                if matches {
                    return *strategy;
                }
            }
            return rule.default_strategy;
        }
        default_strategy_for(field)
    }
}

/// `None` means "no merge semantics for this shape, caller falls back to
/// SOURCE_WINS" (per §4.5's note on undefined MERGE behavior for scalars).
/// MANUAL keeps the target value and still records it as `resolved_value`
/// (SPEC_FULL §C.4) — an operator reviews the `Conflict` row later, but the
/// sync itself must not stall waiting on that review.
fn apply_strategy(strategy: ResolutionStrategy, source: &Value, target: &Value) -> Option<Value> {
    match strategy {
        ResolutionStrategy::SourceWins => Some(source.clone()),
        ResolutionStrategy::TargetWins => Some(target.clone()),
        ResolutionStrategy::Manual => Some(target.clone()),
        ResolutionStrategy::Merge => merge_values(source, target).or_else(|| Some(source.clone())),
    }
}

fn merge_values(source: &Value, target: &Value) -> Option<Value> {
    match (source, target) {
        (Value::Number(s), Value::Number(t)) => {
            let (s, t) = (s.as_f64()?, t.as_f64()?);
            Some(Value::from((s + t) / 2.0))
        }
        (Value::Array(s), Value::Array(t)) => {
            let mut merged = t.clone();
            for item in s {
                if !merged.contains(item) {
                    merged.push(item.clone());
                }
            }
            Some(Value::Array(merged))
        }
        (Value::Object(s), Value::Object(t)) => {
            let mut merged = t.clone();
            for (k, v) in s {
                merged.insert(k.clone(), v.clone());
            }
            Some(Value::Object(merged))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(field: &str, value: Value) -> TransformedRecord {
        let mut data = BTreeMap::new();
        data.insert(field.to_string(), value);
        TransformedRecord { entity_type: "property".into(), source_id: "P1".into(), target_id: Some("T1".into()), target_data: data, notes: vec![] }
    }

    #[test]
    fn no_existing_target_means_no_conflicts() {
        let resolver = ConflictResolver::new(vec![]);
        let (_, conflicts) = resolver.resolve(record("address", Value::String("1 Main St".into())), None);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn address_class_defaults_to_source_wins() {
        let resolver = ConflictResolver::new(vec![]);
        let mut existing = BTreeMap::new();
        existing.insert("address".to_string(), Value::String("2 Old St".into()));
        let (resolved, conflicts) = resolver.resolve(record("address", Value::String("1 Main St".into())), Some(&existing));
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].resolution, Some(ResolutionStrategy::SourceWins));
        assert_eq!(resolved.target_data.get("address").unwrap(), &Value::String("1 Main St".into()));
    }

    #[test]
    fn valuation_class_defaults_to_target_wins() {
        let resolver = ConflictResolver::new(vec![]);
        let mut existing = BTreeMap::new();
        existing.insert("market_value".to_string(), Value::from(200000));
        let (resolved, _) = resolver.resolve(record("market_value", Value::from(180000)), Some(&existing));
        assert_eq!(resolved.target_data.get("market_value").unwrap(), &Value::from(200000));
    }

    #[test]
    fn structural_class_merge_averages_numbers() {
        let resolver = ConflictResolver::new(vec![]);
        let mut existing = BTreeMap::new();
        existing.insert("square_footage".to_string(), Value::from(1000.0));
        let (resolved, conflicts) = resolver.resolve(record("square_footage", Value::from(1200.0)), Some(&existing));
        assert_eq!(conflicts[0].resolution, Some(ResolutionStrategy::Merge));
        assert_eq!(resolved.target_data.get("square_footage").unwrap(), &Value::from(1100.0));
    }

    #[test]
    fn manual_strategy_keeps_target_value() {
        let rule = ResolutionRule {
            entity_type: "property".into(),
            field: "owner_name".into(),
            default_strategy: ResolutionStrategy::Manual,
            overrides: vec![],
        };
        let resolver = ConflictResolver::new(vec![rule]);
        let mut existing = BTreeMap::new();
        existing.insert("owner_name".to_string(), Value::String("Jane Doe".into()));
        let (resolved, conflicts) = resolver.resolve(record("owner_name", Value::String("John Doe".into())), Some(&existing));
        assert_eq!(conflicts[0].resolution, Some(ResolutionStrategy::Manual));
        assert_eq!(conflicts[0].resolved_value, Some(Value::String("Jane Doe".into())));
        assert_eq!(resolved.target_data.get("owner_name").unwrap(), &Value::String("Jane Doe".into()));
    }
}
