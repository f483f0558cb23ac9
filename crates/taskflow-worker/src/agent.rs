//! The agent interface: a single-method capability rather than a base
//! class to subclass. The poller treats every agent as an opaque
//! callable and only cares about the returned [`Verdict`].

use async_trait::async_trait;
use serde_json::Value;
use taskflow_shared::task::Task;

/// The outcome of an agent processing one task. A tagged value, not a
/// class hierarchy.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// The agent needs more information before it can proceed.
    Clarification { questions: Vec<String> },
    /// The agent produced a document-shaped deliverable (e.g. a PRD).
    Document { payload: Value },
    /// The agent raised while processing; the task is held in its
    /// current state and receives an error comment.
    Failure { message: String },
}

/// A pluggable worker agent. The core only calls `process`; everything
/// about how an implementation reasons about a task (prompting an LLM,
/// running a deterministic checker, …) is opaque to the poller.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn process(&self, task: &Task) -> Verdict;
}
