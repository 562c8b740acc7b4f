//! =================================================================
//! The self-healing substrate: circuit breakers, retry strategies, and
//! the orchestrator that wires both to periodic health checks and
//! debounced recovery actions.
//! =================================================================

pub mod breaker;
pub mod error;
pub mod orchestrator;
pub mod retry;

pub use breaker::{BreakerConfig, CircuitBreaker};
pub use error::ResilienceError;
pub use orchestrator::{RecoveryFn, SelfHealingOrchestrator};
pub use retry::{RetryConfig, RetryStrategy, RetryStrategyKind};
