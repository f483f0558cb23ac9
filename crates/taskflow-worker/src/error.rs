use taskflow_shared::{MessagingError, TaskError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkerError>;

/// Error taxonomy for the polling worker loop, adding `AgentFailure`
/// for the one category the orchestrator never raises: an agent that
/// failed mid-`process`. An agent failure never touches task status —
/// it is logged and the task is held in its current state with an
/// appended comment.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Task(#[from] taskflow_shared::TaskError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error("agent failed to process task {task_id}: {message}")]
    AgentFailure { task_id: String, message: String },
}

impl WorkerError {
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Task(e) => e.is_retryable(),
            WorkerError::Messaging(e) => e.is_retryable(),
            WorkerError::AgentFailure { .. } => false,
        }
    }
}
