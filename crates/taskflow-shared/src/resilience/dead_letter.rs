use chrono::{DateTime, Utc};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

/// A message that exhausted its retries or failed terminally.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeadLetterRecord {
    pub message: Value,
    pub original_error: String,
    pub failed_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Append-only, thread-safe store of messages that could not be
/// processed. `retry` resets the message's retry count and re-invokes
/// the callback directly, outside the backoff schedule — matching the
/// reference behavior of manually replaying a dead-lettered message.
#[derive(Debug, Default)]
pub struct DeadLetterStore {
    records: Mutex<Vec<DeadLetterRecord>>,
}

pub type RetryCallback = Box<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

impl DeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, message: Value, original_error: String, failed_at: DateTime<Utc>) {
        let record = DeadLetterRecord {
            message,
            original_error,
            failed_at,
            dead_lettered_at: Utc::now(),
        };
        self.records.lock().unwrap().push(record);
    }

    /// A snapshot copy of the current dead-letter contents.
    pub fn list(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.records.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-invokes `callback` with the message at `index`, removing it
    /// from the store on success. Returns `false` if `index` is out of
    /// bounds or the callback fails.
    pub async fn retry(&self, index: usize, callback: &RetryCallback) -> bool {
        let message = {
            let records = self.records.lock().unwrap();
            match records.get(index) {
                Some(r) => r.message.clone(),
                None => return false,
            }
        };
        match callback(message).await {
            Ok(()) => {
                self.records.lock().unwrap().remove(index);
                true
            }
            Err(_) => false,
        }
    }
}
