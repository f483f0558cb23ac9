//! Domain events and commands.
//!
//! Both are tagged unions: a discriminator (`event_type` / `command_type`)
//! plus a per-variant payload, carried inside a common envelope. The
//! wire shape is `{metadata, payload}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Fields shared by every domain event and command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Envelope {
    pub fn new() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            timestamp: Utc::now(),
            version: "1.0".to_string(),
            correlation_id: None,
            causation_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}

/// A fact: something that has already happened to a task or workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    TaskCreated {
        task_id: String,
        title: String,
        description: String,
        priority: String,
        created_by: String,
    },
    TaskAssigned {
        task_id: String,
        previous_assignee: Option<String>,
        new_assignee: String,
        assigned_by: String,
        assignment_reason: Option<String>,
    },
    TaskStatusChanged {
        task_id: String,
        previous_status: String,
        new_status: String,
        changed_by: String,
        reason: Option<String>,
        related_artifact_ids: Vec<String>,
    },
    TaskCompleted {
        task_id: String,
        completed_by: String,
        outcome_summary: String,
        deliverable_ids: Vec<String>,
        quality_metrics: HashMap<String, Value>,
    },
    TaskCanceled {
        task_id: String,
        canceled_by: String,
        reason: String,
    },
    TaskScanInitiated {
        scan_id: String,
    },
    TaskScanCompleted {
        scan_id: String,
    },
    ClarificationRequested {
        task_id: String,
        questions: Vec<String>,
    },
    ProductRequirementCreated {
        requirement_id: String,
        task_id: String,
        prd_data: Value,
    },
    HumanValidationRequested {
        task_id: String,
        requirement_id: String,
        validation_type: String,
    },
}

impl EventPayload {
    /// The routing key this payload publishes under.
    pub fn event_type(&self) -> &'static str {
        match self {
            EventPayload::TaskCreated { .. } => "TASK_CREATED",
            EventPayload::TaskAssigned { .. } => "TASK_ASSIGNED",
            EventPayload::TaskStatusChanged { .. } => "TASK_STATUS_CHANGED",
            EventPayload::TaskCompleted { .. } => "TASK_COMPLETED",
            EventPayload::TaskCanceled { .. } => "TASK_CANCELED",
            EventPayload::TaskScanInitiated { .. } => "TASK_SCAN_INITIATED",
            EventPayload::TaskScanCompleted { .. } => "TASK_SCAN_COMPLETED",
            EventPayload::ClarificationRequested { .. } => "CLARIFICATION_REQUESTED",
            EventPayload::ProductRequirementCreated { .. } => "PRODUCT_REQUIREMENT_CREATED",
            EventPayload::HumanValidationRequested { .. } => "HUMAN_VALIDATION_REQUESTED",
        }
    }
}

/// Event types that close a workflow in the monitor's workflow index.
/// `WORKFLOW_COMPLETED` and `PRD_APPROVED` are reserved for upstream
/// producers outside this engine (e.g. a product-approval subsystem);
/// they are recognized here even though no local variant emits them.
pub const COMPLETION_EVENT_TYPES: &[&str] =
    &["TASK_COMPLETED", "WORKFLOW_COMPLETED", "PRD_APPROVED"];

/// A domain event: envelope plus fact payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl DomainEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            envelope: Envelope::new(),
            payload,
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.envelope.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}

/// An intent: a request that some action be performed, not yet fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command_type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandPayload {
    QueryTasks {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        assigned_to: Option<String>,
        #[serde(default)]
        status_in: Vec<String>,
    },
    UpdateTaskStatus {
        task_id: String,
        new_status: String,
        #[serde(default)]
        comment: Option<String>,
    },
    AssignTask {
        task_id: String,
        agent_id: String,
        #[serde(default)]
        assignment_reason: Option<String>,
    },
    AddTaskComment {
        task_id: String,
        comment: String,
        #[serde(default)]
        clarification_questions: Vec<String>,
    },
    SendNotification {
        user_id: String,
        task_id: String,
        notification_type: String,
        notification_content: Value,
    },
    LinkRequirementToTask {
        task_id: String,
        requirement_id: String,
        link_type: String,
    },
}

impl CommandPayload {
    pub fn command_type(&self) -> &'static str {
        match self {
            CommandPayload::QueryTasks { .. } => "QUERY_TASKS",
            CommandPayload::UpdateTaskStatus { .. } => "UPDATE_TASK_STATUS",
            CommandPayload::AssignTask { .. } => "ASSIGN_TASK",
            CommandPayload::AddTaskComment { .. } => "ADD_TASK_COMMENT",
            CommandPayload::SendNotification { .. } => "SEND_NOTIFICATION",
            CommandPayload::LinkRequirementToTask { .. } => "LINK_REQUIREMENT_TO_TASK",
        }
    }
}

/// A command: envelope plus intent payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(flatten)]
    pub payload: CommandPayload,
}

impl Command {
    pub fn new(payload: CommandPayload) -> Self {
        Self {
            envelope: Envelope::new(),
            payload,
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.envelope.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn command_type(&self) -> &'static str {
        self.payload.command_type()
    }
}
