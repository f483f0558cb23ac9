use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TaskError>;

/// Error taxonomy for the task aggregate, repository, and bus.
///
/// Variant names match the abstract categories of the error handling
/// design rather than any particular subsystem's internal type, so that
/// the retry controller and the façade can classify errors uniformly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("agent failure: {0}")]
    AgentFailure(String),
}

impl TaskError {
    /// Classifies this error the way the retry controller does: transient
    /// categories are retryable, everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Transient(_))
    }
}

/// Crate-wide result alias for bus operations.
pub type MessagingResult<T> = std::result::Result<T, MessagingError>;

/// Error taxonomy for the message bus.
#[derive(Debug, Error, Clone)]
pub enum MessagingError {
    #[error("bus is not connected")]
    NotConnected,

    #[error("no subscriber registered for queue {0}")]
    NoConsumer(String),

    #[error("failed to serialize message: {0}")]
    Serialization(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("timeout error: {0}")]
    Timeout(String),

    #[error("broker server error: {0}")]
    ServerError(String),

    #[error("circuit breaker open for {0}")]
    CircuitBreakerOpen(String),
}

impl MessagingError {
    /// Whether this error's name matches one of the retryable categories
    /// (connection, timeout, server-error); `CircuitBreakerOpen` and
    /// malformed-message errors are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MessagingError::Connection(_) | MessagingError::Timeout(_) | MessagingError::ServerError(_))
    }
}
