//! Periodic stall detection over the event monitor's workflow index.

use crate::monitor::EventMonitor;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Raised when a workflow has gone longer than `alert_threshold_seconds`
/// without a new event or command.
#[derive(Debug, Clone, Serialize)]
pub struct StallAlert {
    #[serde(rename = "type")]
    pub alert_type: &'static str,
    pub correlation_id: String,
    pub message: String,
    pub start_time: chrono::DateTime<Utc>,
    pub last_update_time: chrono::DateTime<Utc>,
    pub event_count: usize,
    pub command_count: usize,
}

pub type StallCallback = Arc<dyn Fn(StallAlert) + Send + Sync>;

/// Walks [`EventMonitor::active_workflows`] on a fixed interval, raising
/// a [`StallAlert`] to every registered callback for each workflow whose
/// `last_update_time` is older than `alert_threshold`.
pub struct StallDetector {
    monitor: Arc<EventMonitor>,
    check_interval: Duration,
    alert_threshold: Duration,
    callbacks: Vec<StallCallback>,
    running: Arc<AtomicBool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl StallDetector {
    pub fn new(monitor: Arc<EventMonitor>, check_interval: Duration, alert_threshold: Duration) -> Self {
        Self {
            monitor,
            check_interval,
            alert_threshold,
            callbacks: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
            handle: std::sync::Mutex::new(None),
        }
    }

    pub fn on_stall(mut self, callback: StallCallback) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let detector = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(detector.check_interval);
            while detector.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !detector.running.load(Ordering::SeqCst) {
                    break;
                }
                detector.check_once();
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

    fn check_once(&self) {
        let now = Utc::now();
        for workflow in self.monitor.active_workflows() {
            let age = now.signed_duration_since(workflow.last_update_time);
            if age.num_seconds() < self.alert_threshold.as_secs() as i64 {
                continue;
            }
            let alert = StallAlert {
                alert_type: "stalled_workflow",
                correlation_id: workflow.correlation_id.clone(),
                message: format!(
                    "workflow {} has not been updated in {}s",
                    workflow.correlation_id,
                    age.num_seconds()
                ),
                start_time: workflow.start_time,
                last_update_time: workflow.last_update_time,
                event_count: workflow.events.len(),
                command_count: workflow.commands.len(),
            };
            warn!(correlation_id = %alert.correlation_id, age_secs = age.num_seconds(), "stalled workflow detected");
            for callback in &self.callbacks {
                callback(alert.clone());
            }
        }
    }
}

impl Drop for StallDetector {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
        info!("stall detector dropped");
    }
}
