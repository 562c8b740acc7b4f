//! `SyncServiceConfig` (§6 Configuration): scalar settings from environment
//! variables, plus a YAML overlay for the per-resource resilience policy
//! tables that don't fit comfortably into flat env vars.

use crate::error::ConfigError;
use cama_sync_models::ErrorKind;
use cama_sync_resilience::{BreakerConfig, RetryConfig, RetryStrategyKind};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Maps the YAML overlay's exception-name strings onto `ErrorKind`.
/// Unrecognized names are dropped with a warning rather than failing config
/// load — an operator typo in a policy file shouldn't take the service down.
fn parse_monitored_kind(name: &str) -> Option<ErrorKind> {
    match name {
        "Transient" | "transient" => Some(ErrorKind::Transient),
        "RemoteUnavailable" | "remote_unavailable" => Some(ErrorKind::RemoteUnavailable),
        "InputInvalid" | "input_invalid" => Some(ErrorKind::InputInvalid),
        "RecordRejected" | "record_rejected" => Some(ErrorKind::RecordRejected),
        "ConflictUnresolved" | "conflict_unresolved" => Some(ErrorKind::ConflictUnresolved),
        "Internal" | "internal" => Some(ErrorKind::Internal),
        other => {
            tracing::warn!(exception = other, "unrecognized monitored_exceptions entry, ignoring");
            None
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_seconds: u64,
    pub half_open_success_threshold: u32,
    #[serde(default)]
    pub monitored_exceptions: Vec<String>,
}

impl From<&BreakerSettings> for BreakerConfig {
    fn from(s: &BreakerSettings) -> Self {
        let monitored_kinds: Vec<ErrorKind> = s.monitored_exceptions.iter().filter_map(|n| parse_monitored_kind(n)).collect();
        BreakerConfig {
            failure_threshold: s.failure_threshold,
            reset_timeout: Duration::from_secs(s.reset_timeout_seconds),
            half_open_success_threshold: s.half_open_success_threshold,
            monitored_kinds: if monitored_kinds.is_empty() { BreakerConfig::default().monitored_kinds } else { monitored_kinds },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyName {
    Fixed,
    Linear,
    Exponential,
    ExponentialWithJitter,
}

impl From<RetryStrategyName> for RetryStrategyKind {
    fn from(name: RetryStrategyName) -> Self {
        match name {
            RetryStrategyName::Fixed => RetryStrategyKind::Fixed,
            RetryStrategyName::Linear => RetryStrategyKind::Linear,
            RetryStrategyName::Exponential => RetryStrategyKind::Exponential,
            RetryStrategyName::ExponentialWithJitter => RetryStrategyKind::ExponentialWithJitter,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    pub strategy: RetryStrategyName,
    pub initial_wait_ms: u64,
    pub base: f64,
    pub max_wait_ms: u64,
    pub max_retries: u32,
    pub max_retry_time_ms: u64,
    #[serde(default)]
    pub jitter_factor: f64,
}

impl From<&RetrySettings> for RetryConfig {
    fn from(s: &RetrySettings) -> Self {
        RetryConfig {
            kind: s.strategy.clone().into(),
            initial_wait: Duration::from_millis(s.initial_wait_ms),
            base: s.base,
            max_wait: Duration::from_millis(s.max_wait_ms),
            max_retries: s.max_retries,
            max_retry_time: Duration::from_millis(s.max_retry_time_ms),
            jitter_factor: s.jitter_factor,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthSettings {
    pub interval_seconds: u64,
    pub failure_threshold: u32,
    pub recovery_threshold: u32,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub cooldown_seconds: u64,
}

/// The YAML document pointed to by `RESILIENCE_CONFIG_PATH`, if set. Absent
/// entries simply mean the orchestrator isn't given breaker/retry/health
/// policy for that resource and relies on its own defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResiliencePolicy {
    #[serde(default)]
    pub breakers: HashMap<String, BreakerSettings>,
    #[serde(default)]
    pub retries: HashMap<String, RetrySettings>,
    #[serde(default)]
    pub health: HashMap<String, HealthSettings>,
}

#[derive(Debug, Clone)]
pub struct SyncServiceConfig {
    pub worker_pool_size: usize,
    pub batch_size: usize,
    pub stale_job_timeout_minutes: i64,
    pub database_url: String,
    pub port: u16,
    pub field_mapping_path: Option<String>,
    pub resolution_rules_path: Option<String>,
    pub resilience: ResiliencePolicy,
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::InvalidEnvVar { name: name.to_string(), value }),
        Err(_) => Ok(default),
    }
}

impl SyncServiceConfig {
    /// Reads scalar settings from the environment and, if
    /// `RESILIENCE_CONFIG_PATH` is set, overlays the breaker/retry/health
    /// policy tables from that YAML file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

        let resilience = match std::env::var("RESILIENCE_CONFIG_PATH") {
            Ok(path) => load_yaml(&path)?,
            Err(_) => ResiliencePolicy::default(),
        };

        Ok(Self {
            worker_pool_size: parse_env("WORKER_POOL_SIZE", 4usize)?,
            batch_size: parse_env("BATCH_SIZE", 500usize)?,
            stale_job_timeout_minutes: parse_env("STALE_JOB_TIMEOUT_MINUTES", 30i64)?,
            database_url,
            port: parse_env("PORT", 8080u16)?,
            field_mapping_path: std::env::var("FIELD_MAPPING_PATH").ok(),
            resolution_rules_path: std::env::var("RESOLUTION_RULES_PATH").ok(),
            resilience,
        })
    }
}

pub(crate) fn load_yaml<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_string(), source })?;
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml { path: path.to_string(), source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_falls_back_on_missing() {
        let value: usize = parse_env("CAMA_SYNC_DEFINITELY_UNSET_VAR", 42).unwrap();
        assert_eq!(value, 42);
    }
}
