use super::{matches_criteria, Criteria, TaskRepository};
use crate::error::Result;
use crate::task::{Task, TaskStatus};
use async_trait::async_trait;
use dashmap::DashMap;

/// In-memory reference implementation, backed by a sharded concurrent
/// map keyed by `task_id`. Distinct task ids save without contending on
/// a shared lock; concurrent saves of the *same* id are the caller's
/// problem to serialize, per the repository's last-writer-wins contract.
#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    tasks: DashMap<String, Task>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn save(&self, task: &Task) -> Result<()> {
        self.tasks.insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn get_by_id(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.get(task_id).map(|r| r.value().clone()))
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .iter()
            .filter(|r| r.value().status == status)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn find_by_assignee(&self, assignee: &str) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .iter()
            .filter(|r| r.value().assignee.as_deref() == Some(assignee))
            .map(|r| r.value().clone())
            .collect())
    }

    async fn find_by_criteria(&self, criteria: &Criteria) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .iter()
            .filter(|r| matches_criteria(r.value(), criteria))
            .map(|r| r.value().clone())
            .collect())
    }

    async fn delete(&self, task_id: &str) -> Result<bool> {
        Ok(self.tasks.remove(task_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::NewTask;

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let repo = InMemoryTaskRepository::new();
        let task = Task::create("T1", "D1", "u1", NewTask::default());
        repo.save(&task).await.unwrap();

        let loaded = repo.get_by_id(&task.task_id).await.unwrap().unwrap();
        assert_eq!(loaded.task_id, task.task_id);
        assert!(loaded.pending_events().is_empty());
    }

    #[tokio::test]
    async fn find_by_status_filters_correctly() {
        let repo = InMemoryTaskRepository::new();
        for _ in 0..3 {
            let task = Task::create("T", "D", "u1", NewTask::default());
            repo.save(&task).await.unwrap();
        }
        let found = repo.find_by_status(TaskStatus::Created).await.unwrap();
        assert_eq!(found.len(), 3);
        let none = repo.find_by_status(TaskStatus::Completed).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn delete_returns_false_for_missing_task() {
        let repo = InMemoryTaskRepository::new();
        assert!(!repo.delete("missing").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_saves_of_distinct_tasks_do_not_interfere() {
        let repo = std::sync::Arc::new(InMemoryTaskRepository::new());
        let mut handles = Vec::new();
        for i in 0..50 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                let task = Task::create(format!("T{i}"), "D", "u1", NewTask::default());
                repo.save(&task).await.unwrap();
                task.task_id
            }));
        }
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        for id in ids {
            assert!(repo.get_by_id(&id).await.unwrap().is_some());
        }
    }
}
