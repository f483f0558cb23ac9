use taskflow_shared::MessagingError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Error taxonomy for the scanning orchestrator and event monitor:
/// wraps the shared task/messaging categories plus a `ScanPassFailed`
/// variant this crate never actually raises (the scanner never invokes
/// an agent), kept for taxonomy symmetry with
/// `taskflow-worker::WorkerError`.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Task(#[from] taskflow_shared::TaskError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error("scan pass failed: {0}")]
    ScanPassFailed(String),
}

impl OrchestrationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestrationError::Task(e) => e.is_retryable(),
            OrchestrationError::Messaging(e) => e.is_retryable(),
            OrchestrationError::ScanPassFailed(_) => false,
        }
    }
}
