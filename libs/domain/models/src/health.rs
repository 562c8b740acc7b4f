//! Breaker and resource-health state (§3, §4.6, §4.8).
//!
//! These two vocabularies are deliberately kept distinct per the open
//! question in §9: breakers use `{CLOSED, OPEN, HALF_OPEN}`, monitored
//! resources use `{HEALTHY, DEGRADED, FAILING, RECOVERING}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub half_open_successes: u32,
    pub total_success: u64,
    pub total_failure: u64,
}

impl CircuitBreakerState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            half_open_successes: 0,
            total_success: 0,
            total_failure: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Healthy,
    Degraded,
    Failing,
    Recovering,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ResourceStatus::Healthy => "HEALTHY",
            ResourceStatus::Degraded => "DEGRADED",
            ResourceStatus::Failing => "FAILING",
            ResourceStatus::Recovering => "RECOVERING",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceHealth {
    pub resource_id: String,
    pub status: ResourceStatus,
    pub last_check_at: Option<DateTime<Utc>>,
    pub dependencies: BTreeSet<String>,
}

impl ResourceHealth {
    pub fn new(resource_id: impl Into<String>, dependencies: BTreeSet<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            status: ResourceStatus::Healthy,
            last_check_at: None,
            dependencies,
        }
    }
}
