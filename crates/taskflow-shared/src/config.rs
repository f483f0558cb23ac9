//! The engine's single canonical configuration object.
//!
//! Earlier designs this one descends from exposed two overlapping
//! config types; this one unifies them into a single `EngineConfig`,
//! loaded once at bootstrap and passed by value into every subsystem
//! constructor rather than reached for as a global.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Selects which [`crate::bus::MessageBus`] backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageQueueType {
    InMemory,
    Broker,
}

impl Default for MessageQueueType {
    fn default() -> Self {
        MessageQueueType::InMemory
    }
}

/// Tunables for the scanning orchestrator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub scan_interval_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { scan_interval_secs: 300 }
    }
}

impl ScanConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

/// Tunables for the polling worker loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub poll_interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { poll_interval_secs: 60 }
    }
}

impl PollConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Tunables for the event monitor and stall detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub event_log_directory: Option<String>,
    pub max_memory_log_entries: usize,
    pub file_rotation_size_bytes: u64,
    pub alert_threshold_seconds: u64,
    pub stall_check_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            event_log_directory: None,
            max_memory_log_entries: 1000,
            file_rotation_size_bytes: 10 * 1024 * 1024,
            alert_threshold_seconds: 60,
            stall_check_interval_secs: 10,
        }
    }
}

impl MonitorConfig {
    pub fn alert_threshold(&self) -> Duration {
        Duration::from_secs(self.alert_threshold_seconds)
    }

    pub fn stall_check_interval(&self) -> Duration {
        Duration::from_secs(self.stall_check_interval_secs)
    }
}

/// Tunables for the retry/dead-letter controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfigOpts {
    pub max_retries: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_backoff_factor: f64,
}

impl Default for RetryConfigOpts {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_initial_delay_ms: 1000,
            retry_max_delay_ms: 60_000,
            retry_backoff_factor: 2.0,
        }
    }
}

impl From<RetryConfigOpts> for crate::resilience::RetryConfig {
    fn from(opts: RetryConfigOpts) -> Self {
        crate::resilience::RetryConfig {
            max_retries: opts.max_retries,
            initial_delay: Duration::from_millis(opts.retry_initial_delay_ms),
            max_delay: Duration::from_millis(opts.retry_max_delay_ms),
            backoff_factor: opts.retry_backoff_factor,
        }
    }
}

/// Selects and configures a [`crate::repository::TaskRepository`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub backend: RepositoryBackend,
    pub file_directory: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            backend: RepositoryBackend::InMemory,
            file_directory: "./data/tasks".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryBackend {
    InMemory,
    File,
}

/// Connection parameters for the broker-backed bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub amqp_uri: String,
    pub event_exchange: String,
    pub command_exchange: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            amqp_uri: "amqp://127.0.0.1:5672/%2f".to_string(),
            event_exchange: "taskflow.events".to_string(),
            command_exchange: "taskflow.commands".to_string(),
        }
    }
}

/// The single configuration object for the engine. Every recognized
/// configuration key has a home here; every field has a `Default`, so
/// the engine can boot with zero configuration in quick-start mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub message_queue_type: MessageQueueType,
    pub broker: BrokerConfig,
    pub repository: RepositoryConfig,
    pub scan: ScanConfig,
    pub poll: PollConfig,
    pub monitor: MonitorConfig,
    pub retry: RetryConfigOpts,
}

impl EngineConfig {
    /// Loads configuration from `path` (TOML), falling back to defaults
    /// for any key the file omits. Mirrors the reference engine's
    /// layered-defaults-then-file config loading.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&EngineConfig::default())?)
            .add_source(config::File::from(path.as_ref()))
            .build()?;
        settings.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.scan.scan_interval_secs, 300);
        assert_eq!(config.poll.poll_interval_secs, 60);
        assert_eq!(config.monitor.max_memory_log_entries, 1000);
        assert_eq!(config.monitor.alert_threshold_seconds, 60);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.message_queue_type, MessageQueueType::InMemory);
    }

    #[test]
    fn retry_opts_convert_into_resilience_retry_config() {
        let opts = RetryConfigOpts::default();
        let converted: crate::resilience::RetryConfig = opts.into();
        assert_eq!(converted.max_retries, 3);
        assert_eq!(converted.initial_delay, Duration::from_secs(1));
    }
}
