//! The scanning orchestrator: a periodic global sweep that promotes new
//! tasks, and notifies on tasks awaiting clarification or PRD
//! validation.

use dashmap::DashSet;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskflow_shared::bus::MessageBus;
use taskflow_shared::events::{Command, CommandPayload, DomainEvent, EventPayload};
use taskflow_shared::repository::{Criteria, TaskRepository};
use taskflow_shared::task::{TaskStatus, WorkflowStage};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Notification kinds the scanner sends on behalf of clarification- and
/// PRD-validation-pending tasks.
const CLARIFICATION_REQUESTED: &str = "CLARIFICATION_REQUESTED";
const PRD_VALIDATION_REQUESTED: &str = "PRD_VALIDATION_REQUESTED";

/// Periodic global sweep over the task repository.
///
/// The scanner reads the repository directly for its query step rather
/// than round-tripping through a query/response event pair; every
/// *mutation* the scan produces is still a command published to the
/// bus, never a direct aggregate mutation.
pub struct TaskScanner {
    repository: Arc<dyn TaskRepository>,
    bus: MessageBus,
    scan_interval: Duration,
    running: Arc<AtomicBool>,
    /// Tracks which (task_id, notification_type) pairs have already been
    /// notified, since the `Task` aggregate itself carries no such flag.
    /// Recorded as an orchestrator-local decision in DESIGN.md.
    notified: Arc<DashSet<(String, &'static str)>>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl TaskScanner {
    pub fn new(repository: Arc<dyn TaskRepository>, bus: MessageBus, scan_interval: Duration) -> Self {
        Self {
            repository,
            bus,
            scan_interval,
            running: Arc::new(AtomicBool::new(false)),
            notified: Arc::new(DashSet::new()),
            handle: std::sync::Mutex::new(None),
        }
    }

    /// Subscribes to `TaskCreated`/`TaskStatusChanged` so the scanner may
    /// react between ticks. No mandatory behavior is attached; the
    /// handler only logs, and critically never calls back into the
    /// service synchronously from within a publish.
    pub async fn install_reactive_subscriptions(&self) -> taskflow_shared::MessagingResult<()> {
        self.bus
            .subscribe_to_event(
                "TASK_CREATED",
                Arc::new(|event: DomainEvent| {
                    Box::pin(async move {
                        if let EventPayload::TaskCreated { task_id, .. } = event.payload {
                            tracing::debug!(task_id, "scanner observed task creation between ticks");
                        }
                        Ok(())
                    })
                }),
                None,
            )
            .await?;
        self.bus
            .subscribe_to_event(
                "TASK_STATUS_CHANGED",
                Arc::new(|event: DomainEvent| {
                    Box::pin(async move {
                        if let EventPayload::TaskStatusChanged { task_id, new_status, .. } = event.payload {
                            tracing::debug!(task_id, new_status, "scanner observed status change between ticks");
                        }
                        Ok(())
                    })
                }),
                None,
            )
            .await?;
        Ok(())
    }

    /// Starts the periodic tick loop. Idempotent: a second call while
    /// already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let scanner = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(scanner.scan_interval);
            loop {
                interval.tick().await;
                if !scanner.running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(err) = scanner.tick().await {
                    error!(error = %err, "scan tick failed, continuing");
                }
            }
        });
        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Flips the running flag; the loop observes it at its next sleep
    /// boundary and exits without forcibly cancelling an in-flight tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Runs one scan: initiated event, three passes, completed event.
    /// Exceptions inside a pass are logged and do not abort the tick.
    pub async fn tick(&self) -> taskflow_shared::MessagingResult<()> {
        let scan_id = Uuid::now_v7().to_string();
        info!(scan_id, "scan tick starting");

        self.bus
            .publish_event(DomainEvent::new(EventPayload::TaskScanInitiated { scan_id: scan_id.clone() }).with_correlation(scan_id.clone()))
            .await?;

        if let Err(err) = self.promote_new_tasks(&scan_id).await {
            warn!(scan_id, error = %err, "promote-new pass failed");
        }
        if let Err(err) = self.notify_clarification_needed(&scan_id).await {
            warn!(scan_id, error = %err, "clarification-notify pass failed");
        }
        if let Err(err) = self.notify_prd_validation(&scan_id).await {
            warn!(scan_id, error = %err, "prd-validation-notify pass failed");
        }

        self.bus
            .publish_event(DomainEvent::new(EventPayload::TaskScanCompleted { scan_id: scan_id.clone() }).with_correlation(scan_id))
            .await?;
        Ok(())
    }

    async fn promote_new_tasks(&self, scan_id: &str) -> taskflow_shared::MessagingResult<()> {
        let tasks = self.repository.find_by_status(TaskStatus::Created).await.map_err(|e| taskflow_shared::MessagingError::Connection(e.to_string()))?;
        for task in tasks {
            self.bus
                .publish_command(
                    Command::new(CommandPayload::UpdateTaskStatus {
                        task_id: task.task_id.clone(),
                        new_status: "request_validation".to_string(),
                        comment: Some("Promoted by scheduled scan".to_string()),
                    })
                    .with_correlation(scan_id),
                )
                .await?;
            self.bus
                .publish_command(
                    Command::new(CommandPayload::AssignTask {
                        task_id: task.task_id.clone(),
                        agent_id: "product_manager_pool".to_string(),
                        assignment_reason: Some("Auto-assigned for request validation".to_string()),
                    })
                    .with_correlation(scan_id),
                )
                .await?;
        }
        Ok(())
    }

    async fn notify_clarification_needed(&self, scan_id: &str) -> taskflow_shared::MessagingResult<()> {
        let criteria = Criteria {
            workflow_stage: Some(WorkflowStage::ClarificationNeeded),
            ..Default::default()
        };
        let tasks = self.repository.find_by_criteria(&criteria).await.map_err(|e| taskflow_shared::MessagingError::Connection(e.to_string()))?;
        for task in tasks {
            let key = (task.task_id.clone(), CLARIFICATION_REQUESTED);
            if self.notified.contains(&key) {
                continue;
            }
            self.bus
                .publish_command(
                    Command::new(CommandPayload::SendNotification {
                        user_id: task.created_by.clone(),
                        task_id: task.task_id.clone(),
                        notification_type: CLARIFICATION_REQUESTED.to_string(),
                        notification_content: json!({
                            "task_title": task.title,
                            "clarification_questions": [],
                        }),
                    })
                    .with_correlation(scan_id),
                )
                .await?;
            self.notified.insert(key);
        }
        Ok(())
    }

    async fn notify_prd_validation(&self, scan_id: &str) -> taskflow_shared::MessagingResult<()> {
        let criteria = Criteria {
            workflow_stage: Some(WorkflowStage::PrdValidation),
            ..Default::default()
        };
        let tasks = self.repository.find_by_criteria(&criteria).await.map_err(|e| taskflow_shared::MessagingError::Connection(e.to_string()))?;
        for task in tasks {
            let key = (task.task_id.clone(), PRD_VALIDATION_REQUESTED);
            if self.notified.contains(&key) {
                continue;
            }
            self.bus
                .publish_command(
                    Command::new(CommandPayload::SendNotification {
                        user_id: task.created_by.clone(),
                        task_id: task.task_id.clone(),
                        notification_type: PRD_VALIDATION_REQUESTED.to_string(),
                        notification_content: json!({
                            "task_title": task.title,
                            "prd_link": format!("/tasks/{}/prd", task.task_id),
                        }),
                    })
                    .with_correlation(scan_id),
                )
                .await?;
            self.notified.insert(key);
        }
        Ok(())
    }
}
