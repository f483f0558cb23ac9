use serde::{Deserialize, Serialize};
use std::fmt;

/// The task's position in the workflow lifecycle.
///
/// Transitions are constrained to the edges returned by
/// [`TaskStatus::allowed_next`]; `Completed` and `Canceled` are terminal.
/// This is the closed seven-state graph; it accepts exactly the edges
/// named here and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Assigned,
    InProgress,
    Blocked,
    Review,
    Completed,
    Canceled,
}

impl TaskStatus {
    /// The edges allowed out of this state, per the status graph.
    pub fn allowed_next(self) -> &'static [TaskStatus] {
        use TaskStatus::*;
        match self {
            Created => &[Assigned, Canceled],
            Assigned => &[InProgress, Blocked, Canceled],
            InProgress => &[Review, Blocked, Canceled],
            Blocked => &[InProgress, Canceled],
            Review => &[InProgress, Completed, Canceled],
            Completed => &[],
            Canceled => &[],
        }
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Canceled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Created => "created",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Review => "review",
            TaskStatus::Completed => "completed",
            TaskStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// The scanner/poller's product-requirement workflow sub-stage.
///
/// A type distinct from [`TaskStatus`], not an extension of it: the
/// aggregate's own status graph is closed over the seven states above,
/// and this tracks the orchestration-layer progress of a task through
/// request validation and PRD drafting alongside it, the same way
/// `original_source`'s message-queue layer keeps its own `TaskStatus`
/// enum separate from the task-management aggregate's. A task's
/// `workflow_stage` is orthogonal metadata: setting it does not
/// participate in `TaskStatus::allowed_next` and carries no transition
/// table of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    RequestValidation,
    PrdDevelopment,
    PrdValidation,
    ClarificationNeeded,
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStage::RequestValidation => "request_validation",
            WorkflowStage::PrdDevelopment => "prd_development",
            WorkflowStage::PrdValidation => "prd_validation",
            WorkflowStage::ClarificationNeeded => "clarification_needed",
        };
        f.write_str(s)
    }
}

/// Relative importance of a task, used by both the poller's weighted-score
/// prioritization and the scanner's simple ordinal ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    /// Weight used by the poller's combined priority+status score.
    pub fn score(self) -> u32 {
        match self {
            TaskPriority::Critical => 100,
            TaskPriority::High => 75,
            TaskPriority::Medium => 50,
            TaskPriority::Low => 25,
        }
    }

    /// Ordinal used by the scanner-side simple ordering (urgent > high >
    /// medium > low); lower sorts first. This is a distinct scheme from
    /// [`TaskPriority::score`] and must not be conflated with it.
    pub fn ordinal(self) -> u8 {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::High => 1,
            TaskPriority::Medium => 2,
            TaskPriority::Low => 3,
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Medium
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_allows_assigned_and_canceled_only() {
        assert!(TaskStatus::Created.can_transition_to(TaskStatus::Assigned));
        assert!(TaskStatus::Created.can_transition_to(TaskStatus::Canceled));
        assert!(!TaskStatus::Created.can_transition_to(TaskStatus::Review));
        assert!(!TaskStatus::Created.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn completed_and_canceled_are_terminal() {
        assert!(TaskStatus::Completed.allowed_next().is_empty());
        assert!(TaskStatus::Canceled.allowed_next().is_empty());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
    }

    #[test]
    fn priority_score_orders_critical_highest() {
        assert!(TaskPriority::Critical.score() > TaskPriority::High.score());
        assert!(TaskPriority::High.score() > TaskPriority::Medium.score());
        assert!(TaskPriority::Medium.score() > TaskPriority::Low.score());
    }

    #[test]
    fn priority_ordinal_ranks_critical_first() {
        assert_eq!(TaskPriority::Critical.ordinal(), 0);
        assert!(TaskPriority::Critical.ordinal() < TaskPriority::Low.ordinal());
    }

    #[test]
    fn assigned_does_not_allow_a_workflow_stage_name_as_a_task_status_edge() {
        // `TaskStatus` is closed over the seven states; the scanner/poller
        // vocabulary lives entirely in `WorkflowStage` and never appears
        // as a `TaskStatus` variant or edge.
        assert_eq!(TaskStatus::Assigned.allowed_next(), &[TaskStatus::InProgress, TaskStatus::Blocked, TaskStatus::Canceled]);
    }

    #[test]
    fn workflow_stage_display_matches_wire_names() {
        assert_eq!(WorkflowStage::RequestValidation.to_string(), "request_validation");
        assert_eq!(WorkflowStage::PrdDevelopment.to_string(), "prd_development");
        assert_eq!(WorkflowStage::PrdValidation.to_string(), "prd_validation");
        assert_eq!(WorkflowStage::ClarificationNeeded.to_string(), "clarification_needed");
    }
}
