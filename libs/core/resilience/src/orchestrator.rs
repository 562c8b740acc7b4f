//! Self-healing orchestrator (§4.8). Ported from
//! `core/self_healing/orchestrator.py`: a registry of breakers, retries,
//! health checks and recovery actions, plus a periodic health loop that
//! walks the resource dependency graph in topological order.

use crate::breaker::CircuitBreaker;
use crate::error::ResilienceError;
use crate::retry::RetryStrategy;
use cama_sync_models::{ResourceHealth, ResourceStatus, SyncError};
use chrono::Utc;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

const STATUS_HISTORY_CAP: usize = 100;

pub type CheckFuture = Pin<Box<dyn Future<Output = Result<(), SyncError>> + Send>>;
pub type CheckFn = Arc<dyn Fn() -> CheckFuture + Send + Sync>;
pub type RecoveryFn = Arc<dyn Fn() -> CheckFuture + Send + Sync>;

struct HealthCheckEntry {
    check: CheckFn,
    interval: Duration,
    failure_threshold: u32,
    recovery_threshold: u32,
    depends_on: BTreeSet<String>,
    breaker_name: Option<String>,
    retry_name: Option<String>,
    consecutive_failures: u32,
    consecutive_successes: u32,
}

struct RecoveryEntry {
    recover: RecoveryFn,
    cooldown: Duration,
    last_attempt: Option<Instant>,
}

/// Registry + execution facade composing breakers, retries, health checks
/// and recovery actions. Registry mutation is serialized by a coarse lock
/// held only across registration; individual checks and recoveries run
/// outside any lock once snapshotted, matching §4.8's concurrency note.
pub struct SelfHealingOrchestrator {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    retries: Mutex<HashMap<String, Arc<RetryStrategy>>>,
    health_checks: Mutex<HashMap<String, HealthCheckEntry>>,
    recoveries: Mutex<HashMap<String, RecoveryEntry>>,
    resources: Mutex<HashMap<String, ResourceHealth>>,
    status_history: Mutex<HashMap<String, VecDeque<(chrono::DateTime<Utc>, ResourceStatus)>>>,
    loop_running: AtomicBool,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for SelfHealingOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl SelfHealingOrchestrator {
    pub fn new() -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            retries: Mutex::new(HashMap::new()),
            health_checks: Mutex::new(HashMap::new()),
            recoveries: Mutex::new(HashMap::new()),
            resources: Mutex::new(HashMap::new()),
            status_history: Mutex::new(HashMap::new()),
            loop_running: AtomicBool::new(false),
            loop_handle: Mutex::new(None),
        }
    }

    pub fn register_breaker(&self, name: impl Into<String>, breaker: CircuitBreaker) -> Arc<CircuitBreaker> {
        let name = name.into();
        let breaker = Arc::new(breaker);
        self.breakers.lock().expect("breakers registry poisoned").insert(name, breaker.clone());
        breaker
    }

    pub fn register_retry(&self, name: impl Into<String>, retry: RetryStrategy) -> Arc<RetryStrategy> {
        let name = name.into();
        let retry = Arc::new(retry);
        self.retries.lock().expect("retries registry poisoned").insert(name, retry.clone());
        retry
    }

    pub fn breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.lock().expect("breakers registry poisoned").get(name).cloned()
    }

    pub fn retry(&self, name: &str) -> Option<Arc<RetryStrategy>> {
        self.retries.lock().expect("retries registry poisoned").get(name).cloned()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn register_health_check(
        &self,
        resource_id: impl Into<String>,
        check: CheckFn,
        interval: Duration,
        failure_threshold: u32,
        recovery_threshold: u32,
        depends_on: BTreeSet<String>,
        breaker_name: Option<String>,
        retry_name: Option<String>,
    ) {
        let resource_id = resource_id.into();
        self.health_checks.lock().expect("health checks registry poisoned").insert(
            resource_id.clone(),
            HealthCheckEntry {
                check,
                interval,
                failure_threshold,
                recovery_threshold,
                depends_on: depends_on.clone(),
                breaker_name,
                retry_name,
                consecutive_failures: 0,
                consecutive_successes: 0,
            },
        );
        self.resources
            .lock()
            .expect("resources map poisoned")
            .insert(resource_id.clone(), ResourceHealth::new(resource_id, depends_on));
    }

    pub fn register_recovery(&self, resource_id: impl Into<String>, recover: RecoveryFn, cooldown: Duration) {
        self.recoveries.lock().expect("recoveries registry poisoned").insert(
            resource_id.into(),
            RecoveryEntry {
                recover,
                cooldown,
                last_attempt: None,
            },
        );
    }

    /// `breaker wraps` the raw call; `retry` wraps the breaker. A `CircuitOpen`
    /// rejection (surfaced as `SyncError::RemoteUnavailable`) is not retried,
    /// per §4.8's "CircuitOpen is not retried".
    #[instrument(skip_all, fields(breaker = ?breaker_name, retry = ?retry_name))]
    pub async fn execute_with_resilience<F, Fut, T>(
        &self,
        breaker_name: Option<&str>,
        retry_name: Option<&str>,
        f: F,
    ) -> Result<T, SyncError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, SyncError>> + Send,
        T: Send,
    {
        let breaker = breaker_name.and_then(|n| self.breaker(n));
        let retry = retry_name.and_then(|n| self.retry(n));

        match (breaker, retry) {
            (Some(breaker), Some(retry)) => {
                retry
                    .execute(SyncError::is_retryable, || {
                        let breaker = breaker.clone();
                        let f = &f;
                        async move { breaker.execute(|| f()).await }
                    })
                    .await
            }
            (Some(breaker), None) => breaker.execute(|| f()).await,
            (None, Some(retry)) => retry.execute(SyncError::is_retryable, || f()).await,
            (None, None) => f().await,
        }
    }

    pub fn resource_status(&self, resource_id: &str) -> Option<ResourceHealth> {
        self.resources.lock().expect("resources map poisoned").get(resource_id).cloned()
    }

    pub fn status_history(&self, resource_id: &str) -> Vec<(chrono::DateTime<Utc>, ResourceStatus)> {
        self.status_history
            .lock()
            .expect("status history poisoned")
            .get(resource_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn record_status(&self, resource_id: &str, status: ResourceStatus) {
        let mut history = self.status_history.lock().expect("status history poisoned");
        let entries = history.entry(resource_id.to_string()).or_default();
        entries.push_back((Utc::now(), status));
        while entries.len() > STATUS_HISTORY_CAP {
            entries.pop_front();
        }
    }

    /// Topologically order the resources due for a check (`now - last_check_at
    /// >= interval`), skipping any resource involved in a dependency cycle
    /// (logged, not failed) so the rest of the tick still runs.
    fn due_resources_in_check_order(&self) -> Vec<String> {
        let checks = self.health_checks.lock().expect("health checks registry poisoned");
        let resources = self.resources.lock().expect("resources map poisoned");

        let due: BTreeSet<String> = checks
            .iter()
            .filter(|(id, entry)| {
                resources
                    .get(id.as_str())
                    .and_then(|r| r.last_check_at)
                    .map(|last| Utc::now() - last >= chrono::Duration::from_std(entry.interval).unwrap_or_default())
                    .unwrap_or(true)
            })
            .map(|(id, _)| id.clone())
            .collect();

        let mut ordered = Vec::new();
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut in_progress: BTreeSet<String> = BTreeSet::new();

        fn visit(
            id: &str,
            checks: &HashMap<String, HealthCheckEntry>,
            due: &BTreeSet<String>,
            visited: &mut BTreeSet<String>,
            in_progress: &mut BTreeSet<String>,
            ordered: &mut Vec<String>,
        ) -> bool {
            if visited.contains(id) {
                return true;
            }
            if in_progress.contains(id) {
                warn!(resource = id, "dependency cycle detected, skipping for this tick");
                return false;
            }
            in_progress.insert(id.to_string());
            if let Some(entry) = checks.get(id) {
                for dep in &entry.depends_on {
                    if checks.contains_key(dep) && !visit(dep, checks, due, visited, in_progress, ordered) {
                        in_progress.remove(id);
                        return false;
                    }
                }
            }
            in_progress.remove(id);
            visited.insert(id.to_string());
            if due.contains(id) {
                ordered.push(id.to_string());
            }
            true
        }

        for id in due.iter() {
            visit(id, &checks, &due, &mut visited, &mut in_progress, &mut ordered);
        }
        ordered
    }

    /// Run one health-check pass over every due resource, in dependency order.
    pub async fn check_all_resources(&self) {
        for resource_id in self.due_resources_in_check_order() {
            self.check_resource(&resource_id).await;
        }
    }

    async fn check_resource(&self, resource_id: &str) {
        let (check, breaker_name, retry_name, failure_threshold, recovery_threshold) = {
            let checks = self.health_checks.lock().expect("health checks registry poisoned");
            let Some(entry) = checks.get(resource_id) else { return };
            (
                entry.check.clone(),
                entry.breaker_name.clone(),
                entry.retry_name.clone(),
                entry.failure_threshold,
                entry.recovery_threshold,
            )
        };

        let result = self
            .execute_with_resilience(breaker_name.as_deref(), retry_name.as_deref(), || (check)())
            .await;

        {
            let mut resources = self.resources.lock().expect("resources map poisoned");
            if let Some(resource) = resources.get_mut(resource_id) {
                resource.last_check_at = Some(Utc::now());
            }
        }

        let mut checks = self.health_checks.lock().expect("health checks registry poisoned");
        let Some(entry) = checks.get_mut(resource_id) else { return };

        let next_status = match result {
            Ok(()) => {
                entry.consecutive_failures = 0;
                entry.consecutive_successes += 1;
                if entry.consecutive_successes >= recovery_threshold {
                    Some(ResourceStatus::Healthy)
                } else {
                    None
                }
            }
            Err(err) => {
                entry.consecutive_successes = 0;
                entry.consecutive_failures += 1;
                warn!(resource = resource_id, error = %err, failures = entry.consecutive_failures, "health check failed");
                if entry.consecutive_failures >= failure_threshold {
                    Some(ResourceStatus::Failing)
                } else if entry.consecutive_failures > 1 {
                    Some(ResourceStatus::Degraded)
                } else {
                    None
                }
            }
        };
        drop(checks);

        if let Some(status) = next_status {
            self.set_resource_status(resource_id, status);
            if status == ResourceStatus::Failing {
                self.initiate_recovery(resource_id).await;
            }
        }
    }

    fn set_resource_status(&self, resource_id: &str, status: ResourceStatus) {
        let mut resources = self.resources.lock().expect("resources map poisoned");
        if let Some(resource) = resources.get_mut(resource_id) {
            if resource.status != status {
                info!(resource = resource_id, from = %resource.status, to = %status, "resource status transition");
            }
            resource.status = status;
        }
        drop(resources);
        self.record_status(resource_id, status);
    }

    /// Debounced recovery: `FAILING -> RECOVERING`, runs the recovery action
    /// (subject to `cooldown`), resets the resource's breaker on success.
    async fn initiate_recovery(&self, resource_id: &str) {
        self.set_resource_status(resource_id, ResourceStatus::Recovering);

        let should_attempt = {
            let mut recoveries = self.recoveries.lock().expect("recoveries registry poisoned");
            match recoveries.get_mut(resource_id) {
                Some(entry) => {
                    let ready = entry.last_attempt.map(|t| t.elapsed() >= entry.cooldown).unwrap_or(true);
                    if ready {
                        entry.last_attempt = Some(Instant::now());
                    }
                    ready.then(|| entry.recover.clone())
                }
                None => None,
            }
        };

        let Some(recover) = should_attempt else {
            return;
        };

        match recover().await {
            Ok(()) => {
                info!(resource = resource_id, "recovery action succeeded");
                let breaker_name = self
                    .health_checks
                    .lock()
                    .expect("health checks registry poisoned")
                    .get(resource_id)
                    .and_then(|e| e.breaker_name.clone());
                if let Some(name) = breaker_name {
                    if let Some(breaker) = self.breaker(&name) {
                        breaker.reset();
                    }
                }
                {
                    let mut checks = self.health_checks.lock().expect("health checks registry poisoned");
                    if let Some(entry) = checks.get_mut(resource_id) {
                        entry.consecutive_failures = 0;
                        entry.consecutive_successes = 0;
                    }
                }
                self.set_resource_status(resource_id, ResourceStatus::Healthy);
            }
            Err(err) => {
                warn!(resource = resource_id, error = %err, "recovery action failed");
                self.set_resource_status(resource_id, ResourceStatus::Failing);
            }
        }
    }

    /// Spawn the periodic health-check loop. Idempotent: calling twice while
    /// already running is a no-op.
    pub fn start_health_loop(self: &Arc<Self>, tick: Duration) {
        if self.loop_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            while this.loop_running.load(Ordering::SeqCst) {
                interval.tick().await;
                this.check_all_resources().await;
            }
        });
        *self.loop_handle.lock().expect("loop handle poisoned") = Some(handle);
    }

    pub async fn stop_health_loop(&self) {
        self.loop_running.store(false, Ordering::SeqCst);
        let handle = self.loop_handle.lock().expect("loop handle poisoned").take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Convenience: fails if the recovery registry has no entry and no breaker
/// to reset for `resource_id`. Surfaced for operator tooling, not HTTP.
pub fn recovery_not_found(resource_id: &str) -> ResilienceError {
    ResilienceError::UnknownResource(resource_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use std::sync::atomic::AtomicU32;

    fn check_fn(counter: Arc<AtomicU32>, fail_until: u32) -> CheckFn {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < fail_until {
                    Err(SyncError::Transient("down".into()))
                } else {
                    Ok(())
                }
            })
        })
    }

    #[tokio::test]
    async fn resource_transitions_to_failing_and_recovers() {
        let orchestrator = SelfHealingOrchestrator::new();
        let counter = Arc::new(AtomicU32::new(0));
        orchestrator.register_health_check(
            "target-db",
            check_fn(counter.clone(), 3),
            Duration::from_millis(1),
            2,
            1,
            BTreeSet::new(),
            None,
            None,
        );
        let recovered = Arc::new(AtomicBool::new(false));
        let recovered_clone = recovered.clone();
        orchestrator.register_recovery(
            "target-db",
            Arc::new(move || {
                let recovered_clone = recovered_clone.clone();
                Box::pin(async move {
                    recovered_clone.store(true, Ordering::SeqCst);
                    Ok(())
                })
            }),
            Duration::from_millis(0),
        );

        orchestrator.check_all_resources().await;
        orchestrator.check_all_resources().await;
        assert_eq!(
            orchestrator.resource_status("target-db").unwrap().status,
            ResourceStatus::Failing
        );

        orchestrator.check_all_resources().await;
        assert!(recovered.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cyclic_dependencies_are_skipped_not_panicked() {
        let orchestrator = SelfHealingOrchestrator::new();
        let counter = Arc::new(AtomicU32::new(0));
        let mut deps_a = BTreeSet::new();
        deps_a.insert("b".to_string());
        let mut deps_b = BTreeSet::new();
        deps_b.insert("a".to_string());

        orchestrator.register_health_check(
            "a",
            check_fn(counter.clone(), 0),
            Duration::from_millis(1),
            1,
            1,
            deps_a,
            None,
            None,
        );
        orchestrator.register_health_check(
            "b",
            check_fn(counter, 0),
            Duration::from_millis(1),
            1,
            1,
            deps_b,
            None,
            None,
        );

        orchestrator.check_all_resources().await;
    }

    #[tokio::test]
    async fn execute_with_resilience_combines_breaker_and_retry() {
        let orchestrator = SelfHealingOrchestrator::new();
        orchestrator.register_breaker("target", CircuitBreaker::new("target", BreakerConfig::default()));
        orchestrator.register_retry(
            "target",
            RetryStrategy::new(
                "target",
                crate::retry::RetryConfig {
                    kind: crate::retry::RetryStrategyKind::Fixed,
                    initial_wait: Duration::from_millis(1),
                    base: 1.0,
                    max_wait: Duration::from_millis(5),
                    max_retries: 2,
                    max_retry_time: Duration::from_secs(5),
                    jitter_factor: 0.0,
                },
            ),
        );
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let result = orchestrator
            .execute_with_resilience(Some("target"), Some("target"), move || {
                let attempts_clone = attempts_clone.clone();
                async move {
                    let n = attempts_clone.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(SyncError::Transient("flaky".into()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
