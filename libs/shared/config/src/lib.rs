//! Configuration loading (§A.3): `SyncServiceConfig` from environment
//! variables, an optional YAML overlay for per-resource resilience policy,
//! and the `CatalogStore` that hot-reloads field-mapping/resolution-rule
//! catalogs behind an `arc_swap::ArcSwap`.

pub mod catalog;
pub mod error;
pub mod settings;

pub use catalog::CatalogStore;
pub use error::ConfigError;
pub use settings::{BreakerSettings, HealthSettings, ResiliencePolicy, RetrySettings, RetryStrategyName, SyncServiceConfig};
