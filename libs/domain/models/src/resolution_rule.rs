//! Conflict resolution rule configuration (§3, §4.5).

use crate::conflict::ResolutionStrategy;
use serde::{Deserialize, Serialize};

/// An optional override applied before falling back to the rule's default
/// strategy, matching on the source or target value's shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValuePredicate {
    SourceValueIsNull,
    TargetValueIsNull,
}

/// Per-`(entity_type, field)` resolution policy. Looked up exactly; when no
/// rule exists the resolver falls back to field-class defaults and finally
/// to `SOURCE_WINS` (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionRule {
    pub entity_type: String,
    pub field: String,
    pub default_strategy: ResolutionStrategy,
    #[serde(default)]
    pub overrides: Vec<(ValuePredicate, ResolutionStrategy)>,
}
