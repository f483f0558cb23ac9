//! The event monitor: a bounded in-memory log of every message observed
//! on the bus, an optional rotating append-only file writer, and a
//! workflow index keyed by `correlation_id` that the stall detector
//! reads.

use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use taskflow_shared::bus::PublishHook;
use taskflow_shared::events::{Command, DomainEvent, COMPLETION_EVENT_TYPES};
use tracing::warn;

/// One observed message, as kept in the bounded ring buffer.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub kind: &'static str,
    pub routing_key: String,
    pub correlation_id: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub payload: Value,
}

/// The monitor's view of a correlated group of events/commands.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub correlation_id: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub last_update_time: chrono::DateTime<chrono::Utc>,
    pub status: WorkflowStatus,
    pub events: Vec<String>,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus {
    Active,
    Completed,
}

struct RotatingFileWriter {
    directory: PathBuf,
    rotation_size_bytes: u64,
    file: File,
    current_size: u64,
    sequence: u32,
}

impl RotatingFileWriter {
    fn open(directory: &Path, rotation_size_bytes: u64) -> std::io::Result<Self> {
        fs::create_dir_all(directory)?;
        let path = directory.join("events.ndjson");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let current_size = file.metadata()?.len();
        Ok(Self {
            directory: directory.to_path_buf(),
            rotation_size_bytes,
            file,
            current_size,
            sequence: 0,
        })
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let bytes = line.as_bytes();
        if self.current_size + bytes.len() as u64 > self.rotation_size_bytes {
            self.rotate()?;
        }
        self.file.write_all(bytes)?;
        self.file.write_all(b"\n")?;
        self.current_size += bytes.len() as u64 + 1;
        Ok(())
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        self.sequence += 1;
        let rotated_path = self.directory.join(format!("events.{}.ndjson", self.sequence));
        let active_path = self.directory.join("events.ndjson");
        fs::rename(&active_path, rotated_path)?;
        self.file = OpenOptions::new().create(true).append(true).open(&active_path)?;
        self.current_size = 0;
        Ok(())
    }
}

/// Subscribes to every event/command via the bus's publish-hook seam,
/// maintaining a bounded log plus a correlation-keyed workflow index
/// for the stall detector.
pub struct EventMonitor {
    entries: Mutex<VecDeque<LogEntry>>,
    max_memory_entries: usize,
    file_writer: Option<Mutex<RotatingFileWriter>>,
    workflows: Mutex<HashMap<String, WorkflowState>>,
}

impl std::fmt::Debug for EventMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventMonitor")
            .field("max_memory_entries", &self.max_memory_entries)
            .field("file_logging", &self.file_writer.is_some())
            .finish()
    }
}

impl EventMonitor {
    pub fn new(max_memory_entries: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(max_memory_entries)),
            max_memory_entries,
            file_writer: None,
            workflows: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_file_logging(mut self, directory: impl AsRef<Path>, rotation_size_bytes: u64) -> std::io::Result<Self> {
        self.file_writer = Some(Mutex::new(RotatingFileWriter::open(directory.as_ref(), rotation_size_bytes)?));
        Ok(self)
    }

    fn record(&self, entry: LogEntry) {
        {
            let mut entries = self.entries.lock().unwrap();
            if entries.len() >= self.max_memory_entries {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }
        if let Some(writer) = &self.file_writer {
            match serde_json::to_string(&entry) {
                Ok(line) => {
                    if let Err(err) = writer.lock().unwrap().write_line(&line) {
                        warn!(error = %err, "failed to write event log line");
                    }
                }
                Err(err) => warn!(error = %err, "failed to serialize log entry"),
            }
        }

        let Some(correlation_id) = entry.correlation_id else { return };
        let now = entry.timestamp;
        let mut workflows = self.workflows.lock().unwrap();
        let workflow = workflows.entry(correlation_id.clone()).or_insert_with(|| WorkflowState {
            correlation_id: correlation_id.clone(),
            start_time: now,
            last_update_time: now,
            status: WorkflowStatus::Active,
            events: Vec::new(),
            commands: Vec::new(),
        });
        workflow.last_update_time = now;
        if entry.kind == "event" {
            workflow.events.push(entry.routing_key.clone());
            if COMPLETION_EVENT_TYPES.contains(&entry.routing_key.as_str()) {
                workflow.status = WorkflowStatus::Completed;
            }
        } else {
            workflow.commands.push(entry.routing_key.clone());
        }
    }

    /// A snapshot copy of the bounded in-memory log.
    pub fn log(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    /// A snapshot of every workflow still `Active`, for the stall
    /// detector to scan.
    pub fn active_workflows(&self) -> Vec<WorkflowState> {
        self.workflows.lock().unwrap().values().filter(|w| w.status == WorkflowStatus::Active).cloned().collect()
    }

    pub fn workflow(&self, correlation_id: &str) -> Option<WorkflowState> {
        self.workflows.lock().unwrap().get(correlation_id).cloned()
    }
}

impl PublishHook for EventMonitor {
    fn on_event(&self, event: &DomainEvent) {
        self.record(LogEntry {
            kind: "event",
            routing_key: event.event_type().to_string(),
            correlation_id: event.envelope.correlation_id.clone(),
            timestamp: event.envelope.timestamp,
            payload: serde_json::to_value(event).unwrap_or(Value::Null),
        });
    }

    fn on_command(&self, command: &Command) {
        self.record(LogEntry {
            kind: "command",
            routing_key: command.command_type().to_string(),
            correlation_id: command.envelope.correlation_id.clone(),
            timestamp: command.envelope.timestamp,
            payload: serde_json::to_value(command).unwrap_or(Value::Null),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_shared::events::EventPayload;

    fn event_with_correlation(correlation_id: &str) -> DomainEvent {
        DomainEvent::new(EventPayload::TaskCreated {
            task_id: "t1".into(),
            title: "T".into(),
            description: "D".into(),
            priority: "medium".into(),
            created_by: "u1".into(),
        })
        .with_correlation(correlation_id)
    }

    #[test]
    fn recording_an_event_opens_a_new_active_workflow() {
        let monitor = EventMonitor::new(100);
        monitor.on_event(&event_with_correlation("wf-1"));

        let workflow = monitor.workflow("wf-1").unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Active);
        assert_eq!(workflow.events, vec!["TASK_CREATED"]);
    }

    #[test]
    fn task_completed_event_closes_the_workflow() {
        let monitor = EventMonitor::new(100);
        monitor.on_event(&event_with_correlation("wf-1"));

        let completed = DomainEvent::new(EventPayload::TaskCompleted {
            task_id: "t1".into(),
            completed_by: "u1".into(),
            outcome_summary: "ok".into(),
            deliverable_ids: vec![],
            quality_metrics: Default::default(),
        })
        .with_correlation("wf-1");
        monitor.on_event(&completed);

        let workflow = monitor.workflow("wf-1").unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Completed);
        assert!(monitor.active_workflows().is_empty());
    }

    #[test]
    fn ring_buffer_evicts_oldest_entry_once_full() {
        let monitor = EventMonitor::new(2);
        monitor.on_event(&event_with_correlation("wf-1"));
        monitor.on_event(&event_with_correlation("wf-2"));
        monitor.on_event(&event_with_correlation("wf-3"));

        let log = monitor.log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].correlation_id.as_deref(), Some("wf-2"));
        assert_eq!(log[1].correlation_id.as_deref(), Some("wf-3"));
    }

    #[test]
    fn file_backed_monitor_writes_ndjson_lines() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = EventMonitor::new(100).with_file_logging(dir.path(), 10 * 1024 * 1024).unwrap();
        monitor.on_event(&event_with_correlation("wf-1"));

        let contents = std::fs::read_to_string(dir.path().join("events.ndjson")).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("TASK_CREATED"));
    }
}
