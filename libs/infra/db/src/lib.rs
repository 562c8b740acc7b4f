//! libsql-backed persistence layer: connection bootstrap, schema migration,
//! and the `JobRepository`/`AuditSink` implementations plus watermark storage.

pub mod client;
pub mod errors;
pub mod repositories;
pub mod schema;

pub use client::DbClient;
pub use errors::DbError;
pub use repositories::{LibsqlAuditSink, LibsqlJobRepository, WatermarkStore};
