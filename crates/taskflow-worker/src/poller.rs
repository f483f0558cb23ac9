//! The per-agent polling worker loop: single-flight tick, prioritized
//! claim of assigned tasks, agent invocation, verdict translation into
//! further commands/events.

use crate::agent::{Agent, Verdict};
use crate::prioritizer::prioritize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskflow_shared::bus::MessageBus;
use taskflow_shared::events::{Command, CommandPayload, DomainEvent, EventPayload};
use taskflow_shared::repository::TaskRepository;
use taskflow_shared::task::{Task, WorkflowStage};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Releases the single-flight slot on drop, whatever path out of `tick`
/// was taken (including an early return or a panic unwind).
struct SingleFlightGuard<'a>(&'a AtomicBool);

impl Drop for SingleFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Polls for tasks assigned to `agent_id` in `{request_validation,
/// prd_development}`, processes at most one per tick, and reports the
/// outcome through the bus.
///
/// The candidate set for each tick is resolved by a direct repository
/// read rather than a round trip through a second event, mirroring how
/// the scanner resolves its own query path.
pub struct TaskPoller {
    repository: Arc<dyn TaskRepository>,
    bus: MessageBus,
    agent: Arc<dyn Agent>,
    agent_id: String,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl TaskPoller {
    pub fn new(repository: Arc<dyn TaskRepository>, bus: MessageBus, agent: Arc<dyn Agent>, agent_id: impl Into<String>, poll_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            repository,
            bus,
            agent,
            agent_id: agent_id.into(),
            poll_interval,
            running: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicBool::new(false)),
            handle: std::sync::Mutex::new(None),
        })
    }

    /// Listens to `TaskAssigned`/`TaskUnassigned` for this agent's pool.
    /// An unassignment observed while a task is in flight only logs a
    /// warning — cancellation of in-progress agent work is best-effort
    /// and not forced.
    pub async fn install_reactive_subscriptions(self: &Arc<Self>) -> taskflow_shared::MessagingResult<()> {
        let agent_id = self.agent_id.clone();
        let in_flight = self.in_flight.clone();
        self.bus
            .subscribe_to_event(
                "TASK_ASSIGNED",
                Arc::new(move |event: DomainEvent| {
                    let agent_id = agent_id.clone();
                    Box::pin(async move {
                        if let EventPayload::TaskAssigned { new_assignee, task_id, .. } = &event.payload {
                            if new_assignee == &agent_id {
                                debug!(%task_id, "task assigned to this agent's pool");
                            }
                        }
                        Ok(())
                    })
                }),
                None,
            )
            .await?;

        // No `TaskUnassigned` event variant is defined yet; this binding
        // reacts to whatever a future producer publishes under that
        // routing key without depending on a payload shape. If in-flight
        // work is unassigned mid-tick it is only logged, never
        // force-canceled.
        let agent_id = self.agent_id.clone();
        self.bus
            .subscribe_to_event(
                "TASK_UNASSIGNED",
                Arc::new(move |_event: DomainEvent| {
                    let agent_id = agent_id.clone();
                    let in_flight = in_flight.clone();
                    Box::pin(async move {
                        if in_flight.load(Ordering::SeqCst) {
                            warn!(%agent_id, "task unassigned mid-flight; in-progress work will not be forcibly canceled");
                        }
                        Ok(())
                    })
                }),
                None,
            )
            .await?;
        Ok(())
    }

    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let poller = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poller.poll_interval);
            while poller.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !poller.running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(err) = poller.tick().await {
                    warn!(error = %err, "poll tick failed");
                }
            }
        });
        *self.handle.lock().unwrap() = Some(handle);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// One single-flight tick. Returns `Ok(())` immediately (without
    /// querying) if a previous tick's work is still in flight.
    pub async fn tick(&self) -> crate::error::Result<()> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!(agent_id = %self.agent_id, "skipping tick; previous task still in flight");
            return Ok(());
        }
        let _guard = SingleFlightGuard(&self.in_flight);

        let candidates: Vec<Task> = self
            .repository
            .find_by_assignee(&self.agent_id)
            .await?
            .into_iter()
            .filter(|t| matches!(t.workflow_stage, Some(WorkflowStage::RequestValidation) | Some(WorkflowStage::PrdDevelopment)))
            .collect();

        let Some(task) = prioritize(candidates).into_iter().next() else {
            return Ok(());
        };

        info!(task_id = %task.task_id, status = %task.status, workflow_stage = ?task.workflow_stage, "poller claimed task");
        let correlation_id = task.task_id.clone();

        if task.workflow_stage == Some(WorkflowStage::RequestValidation) {
            self.bus
                .publish_command(
                    Command::new(CommandPayload::UpdateTaskStatus {
                        task_id: task.task_id.clone(),
                        new_status: WorkflowStage::PrdDevelopment.to_string(),
                        comment: Some("Claimed for PRD development".to_string()),
                    })
                    .with_correlation(correlation_id.clone()),
                )
                .await?;
        }

        let verdict = self.agent.process(&task).await;
        self.handle_verdict(&task, verdict, &correlation_id).await?;
        Ok(())
    }

    async fn handle_verdict(&self, task: &Task, verdict: Verdict, correlation_id: &str) -> crate::error::Result<()> {
        match verdict {
            Verdict::Clarification { questions } => {
                self.bus
                    .publish_command(
                        Command::new(CommandPayload::AddTaskComment {
                            task_id: task.task_id.clone(),
                            comment: "Agent requested clarification".to_string(),
                            clarification_questions: questions.clone(),
                        })
                        .with_correlation(correlation_id.to_string()),
                    )
                    .await?;
                self.bus
                    .publish_command(
                        Command::new(CommandPayload::UpdateTaskStatus {
                            task_id: task.task_id.clone(),
                            new_status: WorkflowStage::ClarificationNeeded.to_string(),
                            comment: None,
                        })
                        .with_correlation(correlation_id.to_string()),
                    )
                    .await?;
                self.bus
                    .publish_event(
                        DomainEvent::new(EventPayload::ClarificationRequested {
                            task_id: task.task_id.clone(),
                            questions,
                        })
                        .with_correlation(correlation_id.to_string()),
                    )
                    .await?;
            }
            Verdict::Document { payload } => {
                let requirement_id = Uuid::now_v7().to_string();
                self.bus
                    .publish_event(
                        DomainEvent::new(EventPayload::ProductRequirementCreated {
                            requirement_id: requirement_id.clone(),
                            task_id: task.task_id.clone(),
                            prd_data: payload,
                        })
                        .with_correlation(correlation_id.to_string()),
                    )
                    .await?;
                self.bus
                    .publish_command(
                        Command::new(CommandPayload::LinkRequirementToTask {
                            task_id: task.task_id.clone(),
                            requirement_id: requirement_id.clone(),
                            link_type: "produces".to_string(),
                        })
                        .with_correlation(correlation_id.to_string()),
                    )
                    .await?;
                self.bus
                    .publish_command(
                        Command::new(CommandPayload::UpdateTaskStatus {
                            task_id: task.task_id.clone(),
                            new_status: WorkflowStage::PrdValidation.to_string(),
                            comment: None,
                        })
                        .with_correlation(correlation_id.to_string()),
                    )
                    .await?;
                self.bus
                    .publish_event(
                        DomainEvent::new(EventPayload::HumanValidationRequested {
                            task_id: task.task_id.clone(),
                            requirement_id,
                            validation_type: "prd".to_string(),
                        })
                        .with_correlation(correlation_id.to_string()),
                    )
                    .await?;
            }
            Verdict::Failure { message } => {
                warn!(task_id = %task.task_id, %message, "agent failed to process task");
                self.bus
                    .publish_command(
                        Command::new(CommandPayload::AddTaskComment {
                            task_id: task.task_id.clone(),
                            comment: format!("Agent error: {message}"),
                            clarification_questions: Vec::new(),
                        })
                        .with_correlation(correlation_id.to_string()),
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use taskflow_shared::repository::InMemoryTaskRepository;
    use taskflow_shared::task::NewTask;
    use tokio::sync::mpsc;

    struct StaticVerdictAgent(Verdict);

    #[async_trait]
    impl Agent for StaticVerdictAgent {
        async fn process(&self, _task: &Task) -> Verdict {
            self.0.clone()
        }
    }

    async fn wired_bus() -> (MessageBus, mpsc::UnboundedReceiver<Command>, mpsc::UnboundedReceiver<DomainEvent>) {
        let bus = MessageBus::in_memory();
        bus.connect().await.unwrap();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        for command_type in ["UPDATE_TASK_STATUS", "ADD_TASK_COMMENT", "LINK_REQUIREMENT_TO_TASK"] {
            let tx = command_tx.clone();
            bus.subscribe_to_command(
                command_type,
                Arc::new(move |command: Command| {
                    let tx = tx.clone();
                    Box::pin(async move {
                        let _ = tx.send(command);
                        Ok(())
                    })
                }),
                None,
            )
            .await
            .unwrap();
        }
        for event_type in ["CLARIFICATION_REQUESTED", "PRODUCT_REQUIREMENT_CREATED", "HUMAN_VALIDATION_REQUESTED"] {
            let tx = event_tx.clone();
            bus.subscribe_to_event(
                event_type,
                Arc::new(move |event: DomainEvent| {
                    let tx = tx.clone();
                    Box::pin(async move {
                        let _ = tx.send(event);
                        Ok(())
                    })
                }),
                None,
            )
            .await
            .unwrap();
        }
        (bus, command_rx, event_rx)
    }

    async fn seeded_task(repo: &InMemoryTaskRepository, agent_id: &str, stage: WorkflowStage) -> Task {
        let mut task = Task::create("T1", "D1", "u1", NewTask::default());
        task.assign(agent_id, "admin", None).unwrap();
        task.clear_events();
        task.workflow_stage = Some(stage);
        repo.save(&task).await.unwrap();
        task
    }

    #[tokio::test]
    async fn tick_produces_prd_flow_for_a_document_verdict() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        seeded_task(&repo, "agent-1", WorkflowStage::RequestValidation).await;
        let (bus, mut commands, mut events) = wired_bus().await;
        let agent = Arc::new(StaticVerdictAgent(Verdict::Document { payload: json!({"sections": []}) }));
        let poller = TaskPoller::new(repo, bus, agent, "agent-1", Duration::from_secs(60));

        poller.tick().await.unwrap();

        let first_command = commands.recv().await.unwrap();
        assert_eq!(first_command.command_type(), "UPDATE_TASK_STATUS");
        let first_event = events.recv().await.unwrap();
        assert_eq!(first_event.event_type(), "PRODUCT_REQUIREMENT_CREATED");
        let second_command = commands.recv().await.unwrap();
        assert_eq!(second_command.command_type(), "LINK_REQUIREMENT_TO_TASK");
        let third_command = commands.recv().await.unwrap();
        assert_eq!(third_command.command_type(), "UPDATE_TASK_STATUS");
        let second_event = events.recv().await.unwrap();
        assert_eq!(second_event.event_type(), "HUMAN_VALIDATION_REQUESTED");
    }

    #[tokio::test]
    async fn tick_produces_clarification_flow_for_a_clarification_verdict() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        seeded_task(&repo, "agent-1", WorkflowStage::PrdDevelopment).await;
        let (bus, mut commands, mut events) = wired_bus().await;
        let agent = Arc::new(StaticVerdictAgent(Verdict::Clarification { questions: vec!["what deadline?".into()] }));
        let poller = TaskPoller::new(repo, bus, agent, "agent-1", Duration::from_secs(60));

        poller.tick().await.unwrap();

        let comment = commands.recv().await.unwrap();
        assert_eq!(comment.command_type(), "ADD_TASK_COMMENT");
        let status = commands.recv().await.unwrap();
        assert_eq!(status.command_type(), "UPDATE_TASK_STATUS");
        let event = events.recv().await.unwrap();
        assert_eq!(event.event_type(), "CLARIFICATION_REQUESTED");
    }

    #[tokio::test]
    async fn tick_is_single_flight_per_loop_instance() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        seeded_task(&repo, "agent-1", WorkflowStage::RequestValidation).await;
        let (bus, _commands, _events) = wired_bus().await;

        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        struct CountingAgent {
            concurrent: Arc<AtomicUsize>,
            max_concurrent: Arc<AtomicUsize>,
        }
        #[async_trait]
        impl Agent for CountingAgent {
            async fn process(&self, _task: &Task) -> Verdict {
                let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_concurrent.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.concurrent.fetch_sub(1, Ordering::SeqCst);
                Verdict::Document { payload: json!({}) }
            }
        }
        let agent = Arc::new(CountingAgent { concurrent: concurrent.clone(), max_concurrent: max_concurrent.clone() });
        let poller = TaskPoller::new(repo, bus, agent, "agent-1", Duration::from_secs(60));

        let p1 = poller.clone();
        let p2 = poller.clone();
        let (r1, r2) = tokio::join!(tokio::spawn(async move { p1.tick().await }), tokio::spawn(async move { p2.tick().await }));
        r1.unwrap().unwrap();
        r2.unwrap().unwrap();

        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tick_is_a_no_op_when_no_task_is_assigned() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let (bus, _commands, _events) = wired_bus().await;
        let agent = Arc::new(StaticVerdictAgent(Verdict::Document { payload: json!({}) }));
        let poller = TaskPoller::new(repo, bus, agent, "agent-1", Duration::from_secs(60));

        poller.tick().await.unwrap();
    }
}
