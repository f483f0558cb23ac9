//! Cross-cutting resilience primitives: circuit breaking, retry scheduling,
//! and dead-lettering, wrapped around bus publish/consume operations.

mod behavior;
mod circuit_breaker;
mod dead_letter;
mod retry;

pub use behavior::{CircuitBreakerBehavior, CircuitState};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use dead_letter::{DeadLetterRecord, DeadLetterStore, RetryCallback};
pub use retry::{classify, is_retryable_by_name, RetryConfig, RetryController};
