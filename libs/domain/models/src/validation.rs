//! Validation outcomes (§3, §4.3).

use serde::{Deserialize, Serialize};

/// A single validation failure. `code` is the stable, machine-readable
/// discriminant (`PARCEL_FORMAT`, `STATE_LENGTH`, ...); `field` is absent for
/// record-wide errors (e.g. cross-field numeric consistency).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationError {
    pub field: Option<String>,
    pub code: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: Option<&str>, code: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.map(str::to_string),
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self { is_valid: true, errors: Vec::new() }
    }

    pub fn invalid(errors: Vec<ValidationError>) -> Self {
        Self { is_valid: errors.is_empty(), errors }
    }
}
