pub mod audit;
pub mod job;
pub mod watermark;

pub use audit::LibsqlAuditSink;
pub use job::LibsqlJobRepository;
pub use watermark::WatermarkStore;
