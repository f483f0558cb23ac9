//! The task service: the glue between the aggregate, the repository,
//! and the bus, built with explicit dependency injection rather than
//! globals.
//!
//! Every mutating entry point follows one ordering guarantee: load,
//! mutate in memory, save, publish pending events in order, clear.
//! Concurrent mutations of the *same* `task_id` are serialized by an
//! in-process lock keyed by `task_id` rather than a single global
//! mutex, so unrelated tasks never contend.
//!
//! This is also the command executor: it subscribes to every command
//! type the scanner and poller publish and turns them into aggregate
//! mutations, closing the publish-command / consume-and-mutate loop.
//! Subscribers never shortcut this by calling back into the service
//! synchronously from inside a publish.

use crate::bus::MessageBus;
use crate::error::{Result, TaskError};
use crate::events::{Command, CommandPayload, DomainEvent};
use crate::repository::{Criteria, TaskRepository};
use crate::task::{NewTask, Task, TaskStatus, WorkflowStage};
use dashmap::DashMap;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

impl FromStr for TaskStatus {
    type Err = TaskError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created" => Ok(TaskStatus::Created),
            "assigned" => Ok(TaskStatus::Assigned),
            "in_progress" => Ok(TaskStatus::InProgress),
            "blocked" => Ok(TaskStatus::Blocked),
            "review" => Ok(TaskStatus::Review),
            "completed" => Ok(TaskStatus::Completed),
            "canceled" => Ok(TaskStatus::Canceled),
            other => Err(TaskError::Validation(format!("unrecognized status: {other}"))),
        }
    }
}

impl FromStr for WorkflowStage {
    type Err = TaskError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "request_validation" => Ok(WorkflowStage::RequestValidation),
            "prd_development" => Ok(WorkflowStage::PrdDevelopment),
            "prd_validation" => Ok(WorkflowStage::PrdValidation),
            "clarification_needed" => Ok(WorkflowStage::ClarificationNeeded),
            other => Err(TaskError::Validation(format!("unrecognized workflow stage: {other}"))),
        }
    }
}

/// Owns the repository and bus handles and exposes every named domain
/// operation as an async method that also persists and publishes, on
/// top of the bare in-memory `Task` operations.
pub struct TaskService {
    repository: Arc<dyn TaskRepository>,
    bus: MessageBus,
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl std::fmt::Debug for TaskService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskService").field("locked_tasks", &self.locks.len()).finish()
    }
}

impl TaskService {
    pub fn new(repository: Arc<dyn TaskRepository>, bus: MessageBus) -> Arc<Self> {
        Arc::new(Self {
            repository,
            bus,
            locks: DashMap::new(),
        })
    }

    fn lock_for(&self, task_id: &str) -> Arc<AsyncMutex<()>> {
        self.locks.entry(task_id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Persists `task` and publishes its pending events in emission
    /// order, then clears them. Save and publish are not atomic: a
    /// crash between them leaves the repository ahead of what observers
    /// saw, and idempotent consumers are the accepted integration
    /// contract.
    async fn save_and_publish(&self, task: &mut Task, correlation_id: Option<&str>) -> Result<()> {
        self.repository.save(task).await?;
        for event in task.pending_events().to_vec() {
            let event = match correlation_id {
                Some(id) if event.envelope.correlation_id.is_none() => event.with_correlation(id.to_string()),
                _ => event,
            };
            if let Err(err) = self.bus.publish_event(event).await {
                warn!(task_id = %task.task_id, error = %err, "failed to publish a pending domain event");
            }
        }
        task.clear_events();
        Ok(())
    }

    async fn get_required(&self, task_id: &str) -> Result<Task> {
        self.repository.get_by_id(task_id).await?.ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    pub async fn create_task(&self, title: impl Into<String>, description: impl Into<String>, created_by: impl Into<String>, opts: NewTask) -> Result<Task> {
        let mut task = Task::create(title, description, created_by, opts);
        self.save_and_publish(&mut task, None).await?;
        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        self.repository.get_by_id(task_id).await
    }

    pub async fn find_by_criteria(&self, criteria: &Criteria) -> Result<Vec<Task>> {
        self.repository.find_by_criteria(criteria).await
    }

    pub async fn assign_task(&self, task_id: &str, assignee: impl Into<String>, assigned_by: impl Into<String>, reason: Option<String>) -> Result<Task> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let mut task = self.get_required(task_id).await?;
        task.assign(assignee, assigned_by, reason)?;
        self.save_and_publish(&mut task, None).await?;
        Ok(task)
    }

    pub async fn change_status(&self, task_id: &str, new_status: TaskStatus, changed_by: impl Into<String>, reason: Option<String>, artifact_ids: Option<Vec<String>>) -> Result<Task> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let mut task = self.get_required(task_id).await?;
        task.change_status(new_status, changed_by, reason, artifact_ids)?;
        self.save_and_publish(&mut task, None).await?;
        Ok(task)
    }

    pub async fn complete_task(&self, task_id: &str, completed_by: impl Into<String>, outcome_summary: impl Into<String>, deliverable_ids: Vec<String>, quality_metrics: HashMap<String, serde_json::Value>) -> Result<Task> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let mut task = self.get_required(task_id).await?;
        task.complete(completed_by, outcome_summary, deliverable_ids, quality_metrics)?;
        self.save_and_publish(&mut task, None).await?;
        Ok(task)
    }

    pub async fn cancel_task(&self, task_id: &str, canceled_by: impl Into<String>, reason: impl Into<String>) -> Result<Task> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let mut task = self.get_required(task_id).await?;
        task.cancel(canceled_by, reason)?;
        self.save_and_publish(&mut task, None).await?;
        Ok(task)
    }

    /// Sets the task's scanner/poller workflow sub-stage, orthogonal to
    /// `status` (see [`crate::task::WorkflowStage`]).
    pub async fn set_workflow_stage(&self, task_id: &str, stage: WorkflowStage, changed_by: impl Into<String>, reason: Option<String>) -> Result<Task> {
        self.set_workflow_stage_correlated(task_id, stage, changed_by, reason, None).await
    }

    /// Appends `requirement_id` to the task's `requirements_ids`
    /// (duplicates ignored, matching the aggregate's insert semantics
    /// for ordered sequences). The only command among
    /// `LinkRequirementToTask`, `AddTaskComment`, `SendNotification` that
    /// mutates the aggregate: the latter two have no counterpart field
    /// on `Task`, so they are logged side effects only (recorded in
    /// DESIGN.md).
    pub async fn link_requirement(&self, task_id: &str, requirement_id: &str) -> Result<Task> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let mut task = self.get_required(task_id).await?;
        if !task.requirements_ids.contains(&requirement_id.to_string()) {
            task.requirements_ids.push(requirement_id.to_string());
        }
        self.repository.save(&task).await?;
        Ok(task)
    }

    /// Subscribes to every command type the scanner and poller publish,
    /// executing the corresponding domain mutation and republishing the
    /// events it produces. This is the consumer half of the
    /// publish-command / mutate-and-publish-event loop.
    pub async fn install_command_subscriptions(self: &Arc<Self>) -> crate::MessagingResult<()> {
        let service = self.clone();
        self.bus
            .subscribe_to_command(
                "UPDATE_TASK_STATUS",
                Arc::new(move |command: Command| {
                    let service = service.clone();
                    Box::pin(async move { service.handle_update_status(command).await })
                }),
                None,
            )
            .await?;

        let service = self.clone();
        self.bus
            .subscribe_to_command(
                "ASSIGN_TASK",
                Arc::new(move |command: Command| {
                    let service = service.clone();
                    Box::pin(async move { service.handle_assign(command).await })
                }),
                None,
            )
            .await?;

        let service = self.clone();
        self.bus
            .subscribe_to_command(
                "ADD_TASK_COMMENT",
                Arc::new(move |command: Command| {
                    let service = service.clone();
                    Box::pin(async move { service.handle_comment(command).await })
                }),
                None,
            )
            .await?;

        let service = self.clone();
        self.bus
            .subscribe_to_command(
                "SEND_NOTIFICATION",
                Arc::new(move |command: Command| {
                    let service = service.clone();
                    Box::pin(async move { service.handle_notification(command).await })
                }),
                None,
            )
            .await?;

        let service = self.clone();
        self.bus
            .subscribe_to_command(
                "LINK_REQUIREMENT_TO_TASK",
                Arc::new(move |command: Command| {
                    let service = service.clone();
                    Box::pin(async move { service.handle_link_requirement(command).await })
                }),
                None,
            )
            .await?;
        Ok(())
    }

    /// Routes `new_status` against both vocabularies: the literal
    /// `TaskStatus` graph first, falling back to `WorkflowStage` for the
    /// scanner/poller's sub-stage names. Exactly one of the two parses
    /// for any string this command is legitimately published with.
    async fn handle_update_status(&self, command: Command) -> std::result::Result<(), String> {
        let CommandPayload::UpdateTaskStatus { task_id, new_status, comment } = command.payload else {
            return Err("UPDATE_TASK_STATUS command carried the wrong payload shape".to_string());
        };
        let correlation_id = command.envelope.correlation_id.as_deref();
        if let Ok(status) = new_status.parse::<TaskStatus>() {
            self.change_status_correlated(&task_id, status, "system", comment, None, correlation_id).await.map_err(|e| e.to_string())?;
            info!(task_id, %status, "status updated via command");
            return Ok(());
        }
        let stage = new_status.parse::<WorkflowStage>().map_err(|e| e.to_string())?;
        self.set_workflow_stage_correlated(&task_id, stage, "system", comment, correlation_id).await.map_err(|e| e.to_string())?;
        info!(task_id, %stage, "workflow stage updated via command");
        Ok(())
    }

    async fn handle_assign(&self, command: Command) -> std::result::Result<(), String> {
        let CommandPayload::AssignTask { task_id, agent_id, assignment_reason } = command.payload else {
            return Err("ASSIGN_TASK command carried the wrong payload shape".to_string());
        };
        self.assign_correlated(&task_id, agent_id, "system", assignment_reason, command.envelope.correlation_id.as_deref())
            .await
            .map_err(|e| e.to_string())
    }

    async fn handle_comment(&self, command: Command) -> std::result::Result<(), String> {
        let CommandPayload::AddTaskComment { task_id, comment, clarification_questions } = command.payload else {
            return Err("ADD_TASK_COMMENT command carried the wrong payload shape".to_string());
        };
        info!(task_id, comment, questions = ?clarification_questions, "comment recorded (no persisted comment field in the aggregate)");
        Ok(())
    }

    async fn handle_notification(&self, command: Command) -> std::result::Result<(), String> {
        let CommandPayload::SendNotification { user_id, task_id, notification_type, notification_content } = command.payload else {
            return Err("SEND_NOTIFICATION command carried the wrong payload shape".to_string());
        };
        info!(user_id, task_id, notification_type, content = %notification_content, "notification dispatched (delivery is an external concern)");
        Ok(())
    }

    async fn handle_link_requirement(&self, command: Command) -> std::result::Result<(), String> {
        let CommandPayload::LinkRequirementToTask { task_id, requirement_id, link_type } = command.payload else {
            return Err("LINK_REQUIREMENT_TO_TASK command carried the wrong payload shape".to_string());
        };
        self.link_requirement(&task_id, &requirement_id).await.map_err(|e| e.to_string())?;
        info!(task_id, requirement_id, link_type, "requirement linked to task");
        Ok(())
    }

    async fn change_status_correlated(&self, task_id: &str, new_status: TaskStatus, changed_by: &str, reason: Option<String>, artifact_ids: Option<Vec<String>>, correlation_id: Option<&str>) -> Result<Task> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let mut task = self.get_required(task_id).await?;
        task.change_status(new_status, changed_by, reason, artifact_ids)?;
        self.save_and_publish(&mut task, correlation_id).await?;
        Ok(task)
    }

    async fn assign_correlated(&self, task_id: &str, assignee: impl Into<String>, assigned_by: impl Into<String>, reason: Option<String>, correlation_id: Option<&str>) -> Result<Task> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let mut task = self.get_required(task_id).await?;
        task.assign(assignee, assigned_by, reason)?;
        self.save_and_publish(&mut task, correlation_id).await?;
        Ok(task)
    }

    async fn set_workflow_stage_correlated(&self, task_id: &str, stage: WorkflowStage, changed_by: impl Into<String>, reason: Option<String>, correlation_id: Option<&str>) -> Result<Task> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let mut task = self.get_required(task_id).await?;
        task.set_workflow_stage(stage, changed_by, reason)?;
        self.save_and_publish(&mut task, correlation_id).await?;
        Ok(task)
    }
}
