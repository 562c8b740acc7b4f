//! Declarative field-mapping configuration consumed by the Transformer (§3, §4.2).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single named transform plus its string-encoded arguments, e.g.
/// `format_date("%Y-%m-%d")` or `join_fields(" ")`. Mirrors the named-transform
/// set recognized by the transformer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "name", content = "args")]
pub enum TransformSpec {
    Uppercase,
    Lowercase,
    Capitalize,
    Trim,
    ToInt,
    ToFloat,
    ToBool,
    InvertBool,
    FormatDate(String),
    JoinFields(String),
    SplitField(String),
    /// Anything not in the recognized set; skipped with an audit note.
    Unknown(String),
}

impl TransformSpec {
    pub fn name(&self) -> &str {
        match self {
            TransformSpec::Uppercase => "uppercase",
            TransformSpec::Lowercase => "lowercase",
            TransformSpec::Capitalize => "capitalize",
            TransformSpec::Trim => "trim",
            TransformSpec::ToInt => "to_int",
            TransformSpec::ToFloat => "to_float",
            TransformSpec::ToBool => "to_bool",
            TransformSpec::InvertBool => "invert_bool",
            TransformSpec::FormatDate(_) => "format_date",
            TransformSpec::JoinFields(_) => "join_fields",
            TransformSpec::SplitField(_) => "split_field",
            TransformSpec::Unknown(name) => name.as_str(),
        }
    }
}

/// A single source-field to target-field mapping entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source_field: String,
    pub target_field: String,
    #[serde(default)]
    pub transforms: Vec<TransformSpec>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// When set, this field's value is a source-side parent ID that must be
    /// resolved through the caller-supplied `SourceID -> TargetID` map
    /// before being written to `target_field`.
    #[serde(default)]
    pub is_parent_reference: bool,
}

/// The full mapping catalog for one entity type.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EntityFieldMapping {
    pub entity_type: String,
    pub fields: Vec<FieldMapping>,
}

/// The complete, versioned mapping catalog loaded at startup and swapped
/// atomically on reload (§3 "Ownership & lifecycle").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FieldMappingCatalog {
    pub entities: BTreeMap<String, EntityFieldMapping>,
}

impl FieldMappingCatalog {
    pub fn for_entity(&self, entity_type: &str) -> Option<&EntityFieldMapping> {
        self.entities.get(entity_type)
    }
}
