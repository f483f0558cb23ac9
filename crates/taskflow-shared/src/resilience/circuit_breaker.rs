use super::behavior::{CircuitBreakerBehavior, CircuitState};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Tunables for [`CircuitBreaker`]. Not part of the engine's recognized
/// configuration keys; the bus wires one per external broker connection
/// with sensible defaults.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub half_open_after: Duration,
    pub half_open_trial_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            half_open_after: Duration::from_secs(30),
            half_open_trial_calls: 1,
        }
    }
}

/// A simple closed/open/half-open breaker guarding broker calls.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitState>,
    opened_at: Mutex<Option<Instant>>,
    consecutive_failures: AtomicU32,
    half_open_calls: AtomicU32,
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(CircuitState::Closed),
            opened_at: Mutex::new(None),
            consecutive_failures: AtomicU32::new(0),
            half_open_calls: AtomicU32::new(0),
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
        }
    }

    fn maybe_transition_to_half_open(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == CircuitState::Open {
            let opened_at = self.opened_at.lock().unwrap();
            if let Some(t) = *opened_at {
                if t.elapsed() >= self.config.half_open_after {
                    *state = CircuitState::HalfOpen;
                    self.half_open_calls.store(0, Ordering::SeqCst);
                    debug!(breaker = %self.name, "circuit transitioning to half-open");
                }
            }
        }
    }
}

impl CircuitBreakerBehavior for CircuitBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> CircuitState {
        self.maybe_transition_to_half_open();
        *self.state.lock().unwrap()
    }

    fn should_allow(&self) -> bool {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => self.half_open_calls.fetch_add(1, Ordering::SeqCst) < self.config.half_open_trial_calls,
        }
    }

    fn record_success(&self, _elapsed: Duration) {
        self.success_count.fetch_add(1, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Closed;
            debug!(breaker = %self.name, "circuit closed after successful trial");
        }
    }

    fn record_failure(&self, _elapsed: Duration) {
        self.failure_count.fetch_add(1, Ordering::SeqCst);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.lock().unwrap();
        if *state == CircuitState::HalfOpen || failures >= self.config.failure_threshold {
            *state = CircuitState::Open;
            *self.opened_at.lock().unwrap() = Some(Instant::now());
            warn!(breaker = %self.name, failures, "circuit opened");
        }
    }

    fn is_healthy(&self) -> bool {
        self.state() != CircuitState::Open
    }

    fn force_open(&self) {
        *self.state.lock().unwrap() = CircuitState::Open;
        *self.opened_at.lock().unwrap() = Some(Instant::now());
    }

    fn force_closed(&self) {
        *self.state.lock().unwrap() = CircuitState::Closed;
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }
}
