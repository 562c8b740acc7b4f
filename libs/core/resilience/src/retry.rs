//! Retry strategies with fixed/linear/exponential(+jitter) backoff (§4.7).
//! Ported from `core/self_healing/retry_strategy.py`.

use cama_sync_models::SyncError;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategyKind {
    Fixed,
    Linear,
    Exponential,
    ExponentialWithJitter,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub kind: RetryStrategyKind,
    pub initial_wait: Duration,
    /// Linear increment per attempt (`Linear`) or exponential base (`Exponential*`).
    pub base: f64,
    pub max_wait: Duration,
    pub max_retries: u32,
    pub max_retry_time: Duration,
    /// Clamped to `[0, 1]`; only meaningful for `ExponentialWithJitter`.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            kind: RetryStrategyKind::ExponentialWithJitter,
            initial_wait: Duration::from_millis(500),
            base: 2.0,
            max_wait: Duration::from_secs(30),
            max_retries: 3,
            max_retry_time: Duration::from_secs(60),
            jitter_factor: 0.2,
        }
    }
}

#[derive(Debug, Default)]
pub struct RetryMetrics {
    pub attempts: AtomicU64,
    pub successes: AtomicU64,
    pub failures: AtomicU64,
}

impl RetryMetrics {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.attempts.load(Ordering::Relaxed),
            self.successes.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
        )
    }
}

type RetryHook = Box<dyn Fn(u32, &SyncError, Duration) + Send + Sync>;

pub struct RetryStrategy {
    name: String,
    config: RetryConfig,
    metrics: RetryMetrics,
    on_retry: Option<RetryHook>,
}

impl RetryStrategy {
    pub fn new(name: impl Into<String>, config: RetryConfig) -> Self {
        Self {
            name: name.into(),
            config,
            metrics: RetryMetrics::default(),
            on_retry: None,
        }
    }

    /// Optional hook invoked after each retry's sleep, mirroring the
    /// original `BaseRetryStrategy.on_retry` (SPEC_FULL §B.4) — lets an
    /// audit sink observe individual retry attempts without this crate
    /// depending on the audit crate.
    pub fn with_on_retry(mut self, hook: RetryHook) -> Self {
        self.on_retry = Some(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> (u64, u64, u64) {
        self.metrics.snapshot()
    }

    /// `wait_time(attempt)`, `attempt` is 1-indexed (the wait taken *before*
    /// the `attempt`-th retry, i.e. after the 1st failure).
    fn wait_time(&self, attempt: u32) -> Duration {
        let initial = self.config.initial_wait.as_secs_f64();
        let raw = match self.config.kind {
            RetryStrategyKind::Fixed => initial,
            RetryStrategyKind::Linear => initial + (attempt.saturating_sub(1)) as f64 * self.config.base,
            RetryStrategyKind::Exponential => {
                initial * self.config.base.powi(attempt.saturating_sub(1) as i32)
            }
            RetryStrategyKind::ExponentialWithJitter => {
                let base_wait = initial * self.config.base.powi(attempt.saturating_sub(1) as i32);
                let jitter_factor = self.config.jitter_factor.clamp(0.0, 1.0);
                let jitter_range = base_wait * jitter_factor;
                let jitter = rand::thread_rng().gen_range(-jitter_range / 2.0..=jitter_range / 2.0);
                base_wait + jitter
            }
        };
        let max_wait = self.config.max_wait.as_secs_f64();
        Duration::from_secs_f64(raw.min(max_wait).max(0.001))
    }

    /// Execute `f`, retrying per `config` while `retry_on(&err)` holds.
    /// Sleeps strictly between attempts; never sleeps after the final one.
    #[instrument(skip_all, fields(strategy = %self.name))]
    pub async fn execute<F, Fut, T>(&self, retry_on: impl Fn(&SyncError) -> bool, mut f: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let deadline = Instant::now() + self.config.max_retry_time;
        let mut attempt: u32 = 0;
        loop {
            self.metrics.attempts.fetch_add(1, Ordering::Relaxed);
            match f().await {
                Ok(value) => {
                    self.metrics.successes.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(err) => {
                    self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                    if !retry_on(&err) || attempt >= self.config.max_retries || Instant::now() >= deadline {
                        return Err(err);
                    }
                    attempt += 1;
                    let wait = self.wait_time(attempt);
                    if Instant::now() + wait > deadline {
                        return Err(err);
                    }
                    warn!(attempt, wait_ms = wait.as_millis() as u64, "retrying after failure: {}", err);
                    tokio::time::sleep(wait).await;
                    if let Some(hook) = &self.on_retry {
                        hook(attempt, &err, wait);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn exponential_with_jitter_stays_within_bounds() {
        let strategy = RetryStrategy::new(
            "target",
            RetryConfig {
                kind: RetryStrategyKind::ExponentialWithJitter,
                initial_wait: Duration::from_secs(1),
                base: 2.0,
                max_wait: Duration::from_secs(60),
                max_retries: 3,
                max_retry_time: Duration::from_secs(60),
                jitter_factor: 0.2,
            },
        );
        for attempt in 1..=4 {
            let wait = strategy.wait_time(attempt);
            let base = 2f64.powi(attempt as i32 - 1);
            assert!(wait.as_secs_f64() >= (base * 0.9).max(0.001));
            assert!(wait.as_secs_f64() <= base * 1.1);
        }
    }

    #[tokio::test]
    async fn exhausts_max_retries_then_propagates() {
        let strategy = RetryStrategy::new(
            "target",
            RetryConfig {
                kind: RetryStrategyKind::Fixed,
                initial_wait: Duration::from_millis(1),
                base: 1.0,
                max_wait: Duration::from_millis(5),
                max_retries: 3,
                max_retry_time: Duration::from_secs(5),
                jitter_factor: 0.0,
            },
        );
        let calls = AtomicU64::new(0);
        let result = strategy
            .execute(SyncError::is_retryable, || {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Err::<(), _>(SyncError::Transient("always fails".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn on_retry_hook_observes_each_attempt() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let strategy = RetryStrategy::new(
            "target",
            RetryConfig {
                kind: RetryStrategyKind::Fixed,
                initial_wait: Duration::from_millis(1),
                base: 1.0,
                max_wait: Duration::from_millis(5),
                max_retries: 2,
                max_retry_time: Duration::from_secs(5),
                jitter_factor: 0.0,
            },
        )
        .with_on_retry(Box::new(move |attempt, _err, _wait| {
            seen_clone.lock().unwrap().push(attempt);
        }));

        let _ = strategy
            .execute(SyncError::is_retryable, || async { Err::<(), _>(SyncError::Transient("always fails".into())) })
            .await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn non_retryable_error_propagates_immediately() {
        let strategy = RetryStrategy::new("target", RetryConfig::default());
        let calls = AtomicU64::new(0);
        let result = strategy
            .execute(SyncError::is_retryable, || {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Err::<(), _>(SyncError::InputInvalid("bad".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
