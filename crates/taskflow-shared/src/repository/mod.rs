//! The repository contract and its reference implementations.

mod file_backed;
mod in_memory;

pub use file_backed::FileTaskRepository;
pub use in_memory::InMemoryTaskRepository;

use crate::error::Result;
use crate::task::{Task, TaskStatus, WorkflowStage};
use async_trait::async_trait;
use std::collections::HashMap;

/// Equality predicates accepted by [`TaskRepository::find_by_criteria`].
/// `tags` matches a task if the task's tag set contains the given value
/// (`match_all = false`) or all given values (`match_all = true`).
#[derive(Debug, Clone, Default)]
pub struct Criteria {
    pub status: Option<TaskStatus>,
    pub workflow_stage: Option<WorkflowStage>,
    pub assignee: Option<String>,
    pub created_by: Option<String>,
    pub tags: Vec<String>,
    pub match_all_tags: bool,
}

/// A narrow asynchronous CRUD contract over task storage.
///
/// `save` is the only linearization point for an aggregate; concurrent
/// `save` calls for the same `task_id` from two units of work produce
/// last-writer-wins — callers must externally serialize updates to a
/// single aggregate (see the concurrency model).
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn save(&self, task: &Task) -> Result<()>;
    async fn get_by_id(&self, task_id: &str) -> Result<Option<Task>>;
    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>>;
    async fn find_by_assignee(&self, assignee: &str) -> Result<Vec<Task>>;
    async fn find_by_criteria(&self, criteria: &Criteria) -> Result<Vec<Task>>;
    async fn delete(&self, task_id: &str) -> Result<bool>;
}

/// Whether `task` satisfies every predicate in `criteria`, AND-combined.
pub(crate) fn matches_criteria(task: &Task, criteria: &Criteria) -> bool {
    if let Some(status) = criteria.status {
        if task.status != status {
            return false;
        }
    }
    if let Some(stage) = criteria.workflow_stage {
        if task.workflow_stage != Some(stage) {
            return false;
        }
    }
    if let Some(assignee) = &criteria.assignee {
        if task.assignee.as_deref() != Some(assignee.as_str()) {
            return false;
        }
    }
    if let Some(created_by) = &criteria.created_by {
        if &task.created_by != created_by {
            return false;
        }
    }
    if !criteria.tags.is_empty() {
        let matched = if criteria.match_all_tags {
            criteria.tags.iter().all(|t| task.tags.contains(t))
        } else {
            criteria.tags.iter().any(|t| task.tags.contains(t))
        };
        if !matched {
            return false;
        }
    }
    true
}

/// Commonly-queried projection of a task, as stored in the file-backed
/// repository's `index.json`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TaskIndexEntry {
    pub task_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub workflow_stage: Option<WorkflowStage>,
    pub created_by: String,
    pub assignee: Option<String>,
    pub parent_task_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Task> for TaskIndexEntry {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            title: task.title.clone(),
            status: task.status,
            workflow_stage: task.workflow_stage,
            created_by: task.created_by.clone(),
            assignee: task.assignee.clone(),
            parent_task_id: task.parent_task_id.clone(),
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

pub(crate) type Index = HashMap<String, TaskIndexEntry>;
