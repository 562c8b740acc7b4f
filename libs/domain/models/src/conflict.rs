//! Per-field conflicts between transformed and existing target data (§3, §4.5).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStrategy {
    SourceWins,
    TargetWins,
    Merge,
    Manual,
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ResolutionStrategy::SourceWins => "SOURCE_WINS",
            ResolutionStrategy::TargetWins => "TARGET_WINS",
            ResolutionStrategy::Merge => "MERGE",
            ResolutionStrategy::Manual => "MANUAL",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub source_id: String,
    pub entity_type: String,
    pub field: String,
    pub source_value: serde_json::Value,
    pub target_value: serde_json::Value,
    pub resolution: Option<ResolutionStrategy>,
    pub resolved_value: Option<serde_json::Value>,
}
