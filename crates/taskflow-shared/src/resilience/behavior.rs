use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

/// The circuit breaker's current posture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Behavior a circuit breaker must provide, regardless of its internal
/// policy. Object-safe so callers can hold `Arc<dyn CircuitBreakerBehavior>`
/// without committing to a concrete implementation.
pub trait CircuitBreakerBehavior: Send + Sync + Debug {
    fn name(&self) -> &str;
    fn state(&self) -> CircuitState;
    fn should_allow(&self) -> bool;
    fn record_success(&self, elapsed: Duration);
    fn record_failure(&self, elapsed: Duration);
    fn is_healthy(&self) -> bool;
    fn force_open(&self);
    fn force_closed(&self);
}

#[allow(dead_code)]
fn _assert_object_safe(_: &dyn CircuitBreakerBehavior) {}
