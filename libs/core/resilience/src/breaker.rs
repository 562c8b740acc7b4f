//! Circuit breaker (§4.6). Ported from the original service's
//! `core/self_healing/circuit_breaker.py` state machine.

use crate::error::ResilienceError;
use cama_sync_models::{CircuitBreakerState, CircuitState, ErrorKind, SyncError};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_success_threshold: u32,
    /// Error kinds that count toward `consecutive_failures` (§4.6: "monitored
    /// exceptions"). Anything else propagates without touching breaker state.
    pub monitored_kinds: Vec<ErrorKind>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_success_threshold: 1,
            monitored_kinds: vec![ErrorKind::Transient, ErrorKind::RemoteUnavailable],
        }
    }
}

type Callback = Box<dyn Fn() + Send + Sync>;

/// Guards one unreliable dependency. Cheap to clone the name out of, but the
/// breaker itself is meant to be held behind an `Arc` and shared by every
/// caller that invokes the same downstream operation.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: Mutex<CircuitBreakerState>,
    on_open: Option<Callback>,
    on_close: Option<Callback>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let name = name.into();
        Self {
            state: Mutex::new(CircuitBreakerState::new(name.clone())),
            name,
            config,
            on_open: None,
            on_close: None,
        }
    }

    pub fn with_callbacks(mut self, on_open: Option<Callback>, on_close: Option<Callback>) -> Self {
        self.on_open = on_open;
        self.on_close = on_close;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn is_monitored(&self, err: &SyncError) -> bool {
        self.config.monitored_kinds.contains(&err.kind())
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        self.state.lock().expect("breaker state mutex poisoned").clone()
    }

    /// Operator escape hatch (not exposed over HTTP): force the breaker open.
    pub fn force_open(&self) {
        let mut state = self.state.lock().expect("breaker state mutex poisoned");
        state.state = CircuitState::Open;
        state.last_failure_at = Some(Utc::now());
    }

    /// Operator escape hatch: force the breaker closed and clear counters.
    pub fn force_close(&self) {
        let mut state = self.state.lock().expect("breaker state mutex poisoned");
        *state = CircuitBreakerState::new(self.name.clone());
    }

    /// Reset to `CLOSED` with zeroed counters, preserving lifetime totals.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("breaker state mutex poisoned");
        let totals = (state.total_success, state.total_failure);
        *state = CircuitBreakerState::new(self.name.clone());
        state.total_success = totals.0;
        state.total_failure = totals.1;
    }

    /// Decide, without running anything, whether a call is currently
    /// admitted. Transitions `OPEN -> HALF_OPEN` when the reset timeout has
    /// elapsed; this is the only place that transition happens.
    fn admit(&self) -> Result<(), SyncError> {
        let mut state = self.state.lock().expect("breaker state mutex poisoned");
        match state.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let reset_at = state
                    .last_failure_at
                    .unwrap_or_else(Utc::now)
                    + chrono::Duration::from_std(self.config.reset_timeout)
                        .unwrap_or_else(|_| chrono::Duration::zero());
                if Utc::now() >= reset_at {
                    state.state = CircuitState::HalfOpen;
                    state.half_open_successes = 0;
                    info!(circuit = %self.name, "transitioning OPEN -> HALF_OPEN, probing");
                    Ok(())
                } else {
                    let open = ResilienceError::CircuitOpen {
                        circuit_name: self.name.clone(),
                        reset_at,
                    };
                    Err(SyncError::RemoteUnavailable(open.to_string()))
                }
            }
        }
    }

    fn handle_success(&self) {
        let mut state = self.state.lock().expect("breaker state mutex poisoned");
        state.total_success += 1;
        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                state.half_open_successes += 1;
                if state.half_open_successes >= self.config.half_open_success_threshold {
                    state.state = CircuitState::Closed;
                    state.consecutive_failures = 0;
                    state.half_open_successes = 0;
                    info!(circuit = %self.name, "transitioning HALF_OPEN -> CLOSED");
                    if let Some(cb) = &self.on_close {
                        cb();
                    }
                }
            }
            CircuitState::Open => {}
        }
    }

    fn handle_failure(&self) -> DateTime<Utc> {
        let mut state = self.state.lock().expect("breaker state mutex poisoned");
        state.total_failure += 1;
        let now = Utc::now();
        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    state.last_failure_at = Some(now);
                    warn!(circuit = %self.name, failures = state.consecutive_failures, "transitioning CLOSED -> OPEN");
                    if let Some(cb) = &self.on_open {
                        cb();
                    }
                }
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.last_failure_at = Some(now);
                state.half_open_successes = 0;
                warn!(circuit = %self.name, "probe failed, transitioning HALF_OPEN -> OPEN");
                if let Some(cb) = &self.on_open {
                    cb();
                }
            }
            CircuitState::Open => {}
        }
        now
    }

    /// Execute `f` under breaker protection. On rejection (circuit open)
    /// the result is `SyncError::RemoteUnavailable`, which the default
    /// `is_retryable` classification correctly refuses to retry inline
    /// (§7: only the orchestrator's recovery action retries past the
    /// breaker). Underlying failures propagate unchanged so an inline
    /// retry wrapping this breaker can still inspect their real kind.
    /// Errors whose kind is not in `monitored_kinds` propagate without
    /// touching breaker state at all (§4.6: "non-monitored exceptions
    /// propagate without affecting state").
    #[instrument(skip_all, fields(circuit = %self.name))]
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        self.admit()?;
        match f().await {
            Ok(value) => {
                self.handle_success();
                Ok(value)
            }
            Err(err) => {
                if self.is_monitored(&err) {
                    self.handle_failure();
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            reset_timeout: Duration::from_millis(20),
            half_open_success_threshold: 1,
            ..BreakerConfig::default()
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("target", config(5));
        for _ in 0..4 {
            let _ = breaker
                .execute(|| async { Err::<(), _>(SyncError::Transient("boom".into())) })
                .await;
            assert_eq!(breaker.snapshot().state, CircuitState::Closed);
        }
        let _ = breaker
            .execute(|| async { Err::<(), _>(SyncError::Transient("boom".into())) })
            .await;
        assert_eq!(breaker.snapshot().state, CircuitState::Open);

        let result = breaker.execute(|| async { Ok::<(), SyncError>(()) }).await;
        assert!(matches!(result, Err(SyncError::RemoteUnavailable(_))));
    }

    #[tokio::test]
    async fn half_open_closes_on_success() {
        let breaker = CircuitBreaker::new("target", config(1));
        let _ = breaker
            .execute(|| async { Err::<(), _>(SyncError::Transient("boom".into())) })
            .await;
        assert_eq!(breaker.snapshot().state, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;

        let result = breaker.execute(|| async { Ok::<(), SyncError>(()) }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.snapshot().state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_reopens_on_failure() {
        let breaker = CircuitBreaker::new("target", config(1));
        let _ = breaker
            .execute(|| async { Err::<(), _>(SyncError::Transient("boom".into())) })
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let _ = breaker
            .execute(|| async { Err::<(), _>(SyncError::Transient("still broken".into())) })
            .await;
        assert_eq!(breaker.snapshot().state, CircuitState::Open);
    }

    #[tokio::test]
    async fn non_monitored_errors_propagate_without_touching_state() {
        let breaker = CircuitBreaker::new("target", config(1));
        for _ in 0..10 {
            let result = breaker
                .execute(|| async { Err::<(), _>(SyncError::InputInvalid("bad request".into())) })
                .await;
            assert!(matches!(result, Err(SyncError::InputInvalid(_))));
        }
        assert_eq!(breaker.snapshot().state, CircuitState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
    }
}
