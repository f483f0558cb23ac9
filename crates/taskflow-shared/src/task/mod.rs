//! The Task aggregate: the entity, its invariants, and its event-sourced
//! transitions.

mod status;

pub use status::{TaskPriority, TaskStatus, WorkflowStage};

use crate::error::{Result, TaskError};
use crate::events::{DomainEvent, EventPayload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

fn push_unique(seq: &mut Vec<String>, items: impl IntoIterator<Item = String>) {
    for item in items {
        if !seq.contains(&item) {
            seq.push(item);
        }
    }
}

/// The task aggregate root, identified by a stable opaque `task_id`.
///
/// All mutating operations append to `pending_events` and refresh
/// `updated_at`; none of them perform I/O. Persistence and event
/// publication are the caller's responsibility (see the ordering
/// guarantee in the concurrency model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub created_by: String,
    pub assignee: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub requirements_ids: Vec<String>,
    pub tags: Vec<String>,
    pub artifact_ids: Vec<String>,
    pub parent_task_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// The scanner/poller's product-requirement workflow sub-stage, if
    /// the task has entered that flow. Orthogonal to `status`: see
    /// [`WorkflowStage`].
    #[serde(default)]
    pub workflow_stage: Option<WorkflowStage>,

    #[serde(skip)]
    pending_events: Vec<DomainEvent>,
}

/// Optional fields accepted by [`Task::create`]; keeps the factory's
/// signature from growing a new positional parameter every time the
/// model gains an optional field.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub priority: Option<TaskPriority>,
    pub due_date: Option<DateTime<Utc>>,
    pub requirements_ids: Vec<String>,
    pub tags: Vec<String>,
    pub parent_task_id: Option<String>,
}

impl Task {
    /// Factory. Emits `TaskCreated`.
    pub fn create(title: impl Into<String>, description: impl Into<String>, created_by: impl Into<String>, opts: NewTask) -> Self {
        let now = Utc::now();
        let title = title.into();
        let description = description.into();
        let created_by = created_by.into();
        let priority = opts.priority.unwrap_or_default();

        let mut task = Self {
            task_id: Uuid::now_v7().to_string(),
            title: title.clone(),
            description: description.clone(),
            priority,
            status: TaskStatus::Created,
            created_by: created_by.clone(),
            assignee: None,
            due_date: opts.due_date,
            requirements_ids: Vec::new(),
            tags: Vec::new(),
            artifact_ids: Vec::new(),
            parent_task_id: opts.parent_task_id,
            created_at: now,
            updated_at: now,
            workflow_stage: None,
            pending_events: Vec::new(),
        };
        push_unique(&mut task.requirements_ids, opts.requirements_ids);
        push_unique(&mut task.tags, opts.tags);

        task.pending_events.push(DomainEvent::new(EventPayload::TaskCreated {
            task_id: task.task_id.clone(),
            title,
            description,
            priority: priority.to_string(),
            created_by,
        }));
        task
    }

    /// Assigns this task to a principal. Emits `TaskAssigned`; if the
    /// task is currently `created`, also transitions to `assigned` and
    /// emits `TaskStatusChanged` — in that order.
    pub fn assign(&mut self, assignee: impl Into<String>, assigned_by: impl Into<String>, reason: Option<String>) -> Result<()> {
        let assignee = assignee.into();
        let assigned_by = assigned_by.into();
        let previous_assignee = self.assignee.clone();
        self.assignee = Some(assignee.clone());
        self.touch();

        self.pending_events.push(DomainEvent::new(EventPayload::TaskAssigned {
            task_id: self.task_id.clone(),
            previous_assignee,
            new_assignee: assignee,
            assigned_by: assigned_by.clone(),
            assignment_reason: reason,
        }));

        if self.status == TaskStatus::Created {
            self.change_status(TaskStatus::Assigned, assigned_by, Some("Assigned to new owner".to_string()), None)?;
        }
        Ok(())
    }

    /// Validates the edge and transitions, appending artifacts and
    /// emitting `TaskStatusChanged`. A self-transition is a no-op: no
    /// event, no `updated_at` change.
    pub fn change_status(&mut self, new_status: TaskStatus, changed_by: impl Into<String>, reason: Option<String>, related_artifact_ids: Option<Vec<String>>) -> Result<()> {
        if new_status == self.status {
            return Ok(());
        }
        if !self.status.can_transition_to(new_status) {
            return Err(TaskError::InvalidTransition {
                from: self.status.to_string(),
                to: new_status.to_string(),
            });
        }

        let previous_status = self.status;
        self.status = new_status;
        self.touch();

        let artifact_ids = related_artifact_ids.unwrap_or_default();
        push_unique(&mut self.artifact_ids, artifact_ids.clone());

        self.pending_events.push(DomainEvent::new(EventPayload::TaskStatusChanged {
            task_id: self.task_id.clone(),
            previous_status: previous_status.to_string(),
            new_status: new_status.to_string(),
            changed_by: changed_by.into(),
            reason,
            related_artifact_ids: artifact_ids,
        }));
        Ok(())
    }

    /// Equivalent to `change_status(completed, …)` plus `TaskCompleted`.
    /// Fails with `InvalidOperation` if already `canceled`.
    pub fn complete(&mut self, completed_by: impl Into<String>, outcome_summary: impl Into<String>, deliverable_ids: Vec<String>, quality_metrics: HashMap<String, Value>) -> Result<()> {
        if self.status == TaskStatus::Canceled {
            return Err(TaskError::InvalidOperation("cannot complete a canceled task".to_string()));
        }
        if self.status == TaskStatus::Completed {
            return Ok(());
        }
        let completed_by = completed_by.into();
        let outcome_summary = outcome_summary.into();

        self.change_status(TaskStatus::Completed, completed_by.clone(), Some(format!("Task completed: {outcome_summary}")), None)?;

        push_unique(&mut self.artifact_ids, deliverable_ids.clone());
        self.pending_events.push(DomainEvent::new(EventPayload::TaskCompleted {
            task_id: self.task_id.clone(),
            completed_by,
            outcome_summary,
            deliverable_ids,
            quality_metrics,
        }));
        Ok(())
    }

    /// Emits `TaskStatusChanged` + `TaskCanceled`. Fails with
    /// `InvalidOperation` if the task is already `completed`.
    pub fn cancel(&mut self, canceled_by: impl Into<String>, reason: impl Into<String>) -> Result<()> {
        if self.status == TaskStatus::Completed {
            return Err(TaskError::InvalidOperation("cannot cancel a completed task".to_string()));
        }
        if self.status == TaskStatus::Canceled {
            return Ok(());
        }
        let canceled_by = canceled_by.into();
        let reason = reason.into();

        self.change_status(TaskStatus::Canceled, canceled_by.clone(), Some(format!("Task canceled: {reason}")), None)?;

        self.pending_events.push(DomainEvent::new(EventPayload::TaskCanceled {
            task_id: self.task_id.clone(),
            canceled_by,
            reason,
        }));
        Ok(())
    }

    /// Enforces the allowed source states (`assigned`, `blocked`) before
    /// delegating to `change_status`.
    pub fn start_progress(&mut self, started_by: impl Into<String>) -> Result<()> {
        if !matches!(self.status, TaskStatus::Assigned | TaskStatus::Blocked) {
            return Err(TaskError::InvalidOperation(format!("cannot start progress on task in {} status", self.status)));
        }
        self.change_status(TaskStatus::InProgress, started_by, Some("Work started on task".to_string()), None)
    }

    pub fn block(&mut self, blocked_by: impl Into<String>, reason: impl Into<String>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(TaskError::InvalidOperation(format!("cannot block task in {} status", self.status)));
        }
        let reason = reason.into();
        self.change_status(TaskStatus::Blocked, blocked_by, Some(format!("Task blocked: {reason}")), None)
    }

    pub fn ready_for_review(&mut self, submitted_by: impl Into<String>, artifact_ids: Option<Vec<String>>) -> Result<()> {
        if self.status != TaskStatus::InProgress {
            return Err(TaskError::InvalidOperation(format!("cannot submit for review a task in {} status", self.status)));
        }
        self.change_status(TaskStatus::Review, submitted_by, Some("Task ready for review".to_string()), artifact_ids)
    }

    /// Sets the scanner/poller workflow sub-stage. Orthogonal to
    /// `status`: not validated against `TaskStatus::allowed_next`, since
    /// `WorkflowStage` carries no edges of its own. A no-op (no event,
    /// no `updated_at` change) if `stage` already matches. Emits
    /// `TaskStatusChanged` for observability, reusing the same event
    /// shape the literal status graph uses.
    pub fn set_workflow_stage(&mut self, stage: WorkflowStage, changed_by: impl Into<String>, reason: Option<String>) -> Result<()> {
        if self.workflow_stage == Some(stage) {
            return Ok(());
        }
        let previous = self.workflow_stage;
        self.workflow_stage = Some(stage);
        self.touch();

        self.pending_events.push(DomainEvent::new(EventPayload::TaskStatusChanged {
            task_id: self.task_id.clone(),
            previous_status: previous.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string()),
            new_status: stage.to_string(),
            changed_by: changed_by.into(),
            reason,
            related_artifact_ids: Vec::new(),
        }));
        Ok(())
    }

    /// Events produced by the current unit of work, in emission order.
    pub fn pending_events(&self) -> &[DomainEvent] {
        &self.pending_events
    }

    /// Clears pending events after they have been published.
    pub fn clear_events(&mut self) {
        self.pending_events.clear();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_task() -> Task {
        Task::create("T1", "D1", "u1", NewTask::default())
    }

    #[test]
    fn create_emits_task_created() {
        let task = new_task();
        assert_eq!(task.status, TaskStatus::Created);
        assert_eq!(task.pending_events().len(), 1);
        assert_eq!(task.pending_events()[0].event_type(), "TASK_CREATED");
    }

    #[test]
    fn assign_from_created_cascades_to_assigned_status() {
        let mut task = new_task();
        task.clear_events();
        task.assign("agent-1", "admin", None).unwrap();

        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.assignee.as_deref(), Some("agent-1"));
        let events: Vec<_> = task.pending_events().iter().map(|e| e.event_type()).collect();
        assert_eq!(events, vec!["TASK_ASSIGNED", "TASK_STATUS_CHANGED"]);
    }

    #[test]
    fn full_lifecycle_scenario_emits_expected_event_sequence() {
        let mut task = Task::create("T1", "D1", "u1", NewTask { priority: Some(TaskPriority::Medium), ..Default::default() });
        task.assign("agent-1", "admin", None).unwrap();
        task.start_progress("agent-1").unwrap();
        task.ready_for_review("agent-1", None).unwrap();
        task.complete("reviewer", "ok", vec!["a1".to_string()], HashMap::new()).unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        let types: Vec<_> = task.pending_events().iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec![
                "TASK_CREATED",
                "TASK_ASSIGNED",
                "TASK_STATUS_CHANGED",
                "TASK_STATUS_CHANGED",
                "TASK_STATUS_CHANGED",
                "TASK_STATUS_CHANGED",
                "TASK_COMPLETED",
            ]
        );
        assert!(task.artifact_ids.contains(&"a1".to_string()));
    }

    #[test]
    fn illegal_transition_is_rejected_without_mutation() {
        let mut task = new_task();
        task.clear_events();
        let before_updated_at = task.updated_at;

        let err = task.change_status(TaskStatus::Review, "u1", None, None).unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        assert_eq!(task.status, TaskStatus::Created);
        assert_eq!(task.updated_at, before_updated_at);
        assert!(task.pending_events().is_empty());
    }

    #[test]
    fn cancel_of_completed_task_is_invalid_operation() {
        let mut task = new_task();
        task.assign("agent-1", "admin", None).unwrap();
        task.start_progress("agent-1").unwrap();
        task.ready_for_review("agent-1", None).unwrap();
        task.complete("reviewer", "ok", vec![], HashMap::new()).unwrap();

        let err = task.cancel("u1", "late").unwrap_err();
        assert!(matches!(err, TaskError::InvalidOperation(_)));
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn self_transition_is_a_no_op() {
        let mut task = new_task();
        task.clear_events();
        let before_updated_at = task.updated_at;

        task.change_status(TaskStatus::Created, "u1", None, None).unwrap();
        assert_eq!(task.updated_at, before_updated_at);
        assert!(task.pending_events().is_empty());
    }

    #[test]
    fn artifact_ids_are_monotonically_non_shrinking() {
        let mut task = new_task();
        task.assign("agent-1", "admin", None).unwrap();
        task.start_progress("agent-1").unwrap();
        task.ready_for_review("agent-1", Some(vec!["a1".to_string()])).unwrap();
        let before = task.artifact_ids.clone();

        task.complete("reviewer", "ok", vec!["a1".to_string(), "a2".to_string()], HashMap::new()).unwrap();
        for id in &before {
            assert!(task.artifact_ids.contains(id));
        }
        assert!(task.artifact_ids.contains(&"a2".to_string()));
    }

    #[test]
    fn set_workflow_stage_is_orthogonal_to_status() {
        let mut task = new_task();
        task.assign("agent-1", "admin", None).unwrap();
        task.clear_events();

        task.set_workflow_stage(WorkflowStage::RequestValidation, "system", None).unwrap();
        assert_eq!(task.status, TaskStatus::Assigned, "workflow stage changes do not move the literal status");
        assert_eq!(task.workflow_stage, Some(WorkflowStage::RequestValidation));
        assert_eq!(task.pending_events().len(), 1);

        task.clear_events();
        task.set_workflow_stage(WorkflowStage::RequestValidation, "system", None).unwrap();
        assert!(task.pending_events().is_empty(), "re-setting the same stage is a no-op");
    }

    #[test]
    fn to_json_round_trips_observable_fields() {
        let task = new_task();
        let json = serde_json::to_value(&task).unwrap();
        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back.task_id, task.task_id);
        assert_eq!(back.title, task.title);
        assert_eq!(back.status, task.status);
        assert_eq!(back.created_at, task.created_at);
        assert!(back.pending_events().is_empty(), "reconstructed tasks start with no pending events");
    }
}
