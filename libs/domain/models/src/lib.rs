//! Core entity types shared by every stage of the synchronization pipeline.
//!
//! These are plain data types; none of them carry behavior beyond small
//! invariant-preserving constructors. The stages that operate on them
//! (`cama-sync-pipeline`, `cama-sync-job-manager`) live in their own crates.

pub mod cancellation;
pub mod conflict;
pub mod error;
pub mod field_mapping;
pub mod health;
pub mod job;
pub mod record;
pub mod resolution_rule;
pub mod validation;
pub mod watermark;

pub use cancellation::CancellationToken;
pub use conflict::{Conflict, ResolutionStrategy};
pub use error::{ErrorKind, SyncError};
pub use field_mapping::{EntityFieldMapping, FieldMapping, FieldMappingCatalog, TransformSpec};
pub use health::{CircuitBreakerState, CircuitState, ResourceHealth, ResourceStatus};
pub use job::{Job, JobKind, JobStatus};
pub use record::{SourceRecord, TransformedRecord};
pub use resolution_rule::{ResolutionRule, ValuePredicate};
pub use validation::{ValidationError, ValidationResult};
pub use watermark::Watermark;
