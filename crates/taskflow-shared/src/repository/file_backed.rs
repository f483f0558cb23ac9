use super::{matches_criteria, Criteria, Index, TaskIndexEntry, TaskRepository};
use crate::error::{Result, TaskError};
use crate::task::{Task, TaskStatus};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// Writes one JSON file per task under `directory`, plus an `index.json`
/// projection for cheap listing queries.
///
/// Index updates and task-file writes are not atomic with respect to a
/// crash between them — consistent with the design's accepted ordering
/// gap between save and publish; a rebuild-from-task-files pass is not
/// implemented here as nothing in the tested scenarios exercises crash
/// recovery.
#[derive(Debug)]
pub struct FileTaskRepository {
    directory: PathBuf,
    index_lock: Mutex<()>,
}

impl FileTaskRepository {
    pub async fn open(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)
            .await
            .map_err(|e| TaskError::Transient(format!("failed to create repository directory: {e}")))?;
        Ok(Self {
            directory,
            index_lock: Mutex::new(()),
        })
    }

    fn task_path(&self, task_id: &str) -> PathBuf {
        self.directory.join(format!("{task_id}.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.directory.join("index.json")
    }

    async fn read_index(&self) -> Result<Index> {
        let path = self.index_path();
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| TaskError::Validation(format!("corrupt index.json: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Index::new()),
            Err(e) => Err(TaskError::Transient(format!("failed to read index.json: {e}"))),
        }
    }

    async fn write_index(&self, index: &Index) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(index).map_err(|e| TaskError::Validation(e.to_string()))?;
        fs::write(self.index_path(), bytes)
            .await
            .map_err(|e| TaskError::Transient(format!("failed to write index.json: {e}")))
    }

    async fn load_task_file(&self, task_id: &str) -> Result<Option<Task>> {
        match fs::read(self.task_path(task_id)).await {
            Ok(bytes) => {
                let task = serde_json::from_slice(&bytes).map_err(|e| TaskError::Validation(format!("corrupt task file: {e}")))?;
                Ok(Some(task))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TaskError::Transient(format!("failed to read task file: {e}"))),
        }
    }
}

#[async_trait]
impl TaskRepository for FileTaskRepository {
    async fn save(&self, task: &Task) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(task).map_err(|e| TaskError::Validation(e.to_string()))?;
        fs::write(self.task_path(&task.task_id), bytes)
            .await
            .map_err(|e| TaskError::Transient(format!("failed to write task file: {e}")))?;

        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index().await?;
        index.insert(task.task_id.clone(), TaskIndexEntry::from(task));
        self.write_index(&index).await
    }

    async fn get_by_id(&self, task_id: &str) -> Result<Option<Task>> {
        self.load_task_file(task_id).await
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let index = self.read_index().await?;
        let mut tasks = Vec::new();
        for entry in index.values().filter(|e| e.status == status) {
            if let Some(task) = self.load_task_file(&entry.task_id).await? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    async fn find_by_assignee(&self, assignee: &str) -> Result<Vec<Task>> {
        let index = self.read_index().await?;
        let mut tasks = Vec::new();
        for entry in index.values().filter(|e| e.assignee.as_deref() == Some(assignee)) {
            if let Some(task) = self.load_task_file(&entry.task_id).await? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    async fn find_by_criteria(&self, criteria: &Criteria) -> Result<Vec<Task>> {
        let index = self.read_index().await?;
        let mut tasks = Vec::new();
        for entry in index.values() {
            if let Some(task) = self.load_task_file(&entry.task_id).await? {
                if matches_criteria(&task, criteria) {
                    tasks.push(task);
                }
            }
        }
        Ok(tasks)
    }

    async fn delete(&self, task_id: &str) -> Result<bool> {
        let existed = fs::remove_file(self.task_path(task_id)).await.is_ok();

        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index().await?;
        let removed_from_index = index.remove(task_id).is_some();
        self.write_index(&index).await?;

        Ok(existed || removed_from_index)
    }
}
