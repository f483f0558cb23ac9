//! Request and response bodies for the REST endpoints. These are
//! deliberately thin wire shapes, separate from the domain `Task` type,
//! so the aggregate's internal representation can evolve without
//! breaking the HTTP contract.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use taskflow_shared::{Task, TaskPriority, TaskStatus, WorkflowStage};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: String,
    pub created_by: String,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub requirements_ids: Vec<String>,
    #[serde(default)]
    pub parent_task_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    pub changed_by: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub artifact_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignTaskRequest {
    pub assignee: String,
    pub assigned_by: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompleteTaskRequest {
    pub completed_by: String,
    pub outcome_summary: String,
    #[serde(default)]
    pub deliverable_ids: Vec<String>,
    #[serde(default)]
    pub quality_metrics: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelTaskRequest {
    pub canceled_by: String,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListTasksQuery {
    pub status: Option<String>,
    pub assignee: Option<String>,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskResponse {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub workflow_stage: Option<WorkflowStage>,
    pub created_by: String,
    pub assignee: Option<String>,
    pub requirements_ids: Vec<String>,
    pub tags: Vec<String>,
    pub artifact_ids: Vec<String>,
    pub parent_task_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Task> for TaskResponse {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            priority: task.priority,
            status: task.status,
            workflow_stage: task.workflow_stage,
            created_by: task.created_by.clone(),
            assignee: task.assignee.clone(),
            requirements_ids: task.requirements_ids.clone(),
            tags: task.tags.clone(),
            artifact_ids: task.artifact_ids.clone(),
            parent_task_id: task.parent_task_id.clone(),
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self::from(&task)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskResponse>,
}
