//! Bootstrap binary for the workflow engine: loads configuration, wires
//! the bus, repository, service, background subsystems, and (optionally)
//! the HTTP façade, then waits for a shutdown signal.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use taskflow_orchestration::{EventMonitor, StallDetector, TaskScanner};
use taskflow_shared::bus::MessageBus;
use taskflow_shared::config::{EngineConfig, MessageQueueType, RepositoryBackend};
use taskflow_shared::repository::{FileTaskRepository, InMemoryTaskRepository, TaskRepository};
use taskflow_shared::TaskService;
use taskflow_worker::{Agent, TaskPoller, Verdict};
use tokio::signal;
use tracing::{error, info, warn};

/// A minimal built-in agent that produces no real analysis; every verdict
/// it returns is a `Document` carrying its task's own title. Real
/// deployments inject a domain-specific `Agent` in place of this one.
struct EchoAgent;

#[async_trait::async_trait]
impl Agent for EchoAgent {
    async fn process(&self, task: &taskflow_shared::Task) -> Verdict {
        Verdict::Document {
            payload: serde_json::json!({ "task_id": task.task_id, "title": task.title }),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "taskflow-engine", about = "Asynchronous workflow engine")]
struct Cli {
    /// Path to a TOML configuration file; defaults are used for any key it omits.
    #[arg(long)]
    config: Option<String>,

    /// Serve the HTTP façade on this address (e.g. 0.0.0.0:8080); omit to run headless.
    #[arg(long)]
    http_addr: Option<String>,
}

fn init_tracing() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).json().init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load_from_file(path).with_context(|| format!("failed to load configuration from {path}"))?,
        None => EngineConfig::default(),
    };

    info!(version = env!("CARGO_PKG_VERSION"), "starting taskflow-engine");

    let monitor = Arc::new(build_monitor(&config)?);

    let bus = match config.message_queue_type {
        MessageQueueType::InMemory => MessageBus::in_memory(),
        MessageQueueType::Broker => MessageBus::broker(config.broker.clone()),
    }
    .with_hooks(vec![monitor.clone() as Arc<dyn taskflow_shared::bus::PublishHook>]);
    bus.connect().await.context("failed to connect the message bus")?;

    let repository: Arc<dyn TaskRepository> = match config.repository.backend {
        RepositoryBackend::InMemory => Arc::new(InMemoryTaskRepository::new()),
        RepositoryBackend::File => Arc::new(FileTaskRepository::open(&config.repository.file_directory).await?),
    };

    let service = TaskService::new(repository.clone(), bus.clone());
    service.install_command_subscriptions().await.context("failed to install command subscriptions")?;

    let scanner = Arc::new(TaskScanner::new(repository.clone(), bus.clone(), config.scan.scan_interval()));
    scanner.install_reactive_subscriptions().await.context("failed to install scanner subscriptions")?;
    scanner.start();

    let poller = TaskPoller::new(repository.clone(), bus.clone(), Arc::new(EchoAgent), "product_manager_pool", config.poll.poll_interval());
    poller.install_reactive_subscriptions().await.context("failed to install poller subscriptions")?;
    poller.start();

    let stall_detector = Arc::new(
        StallDetector::new(monitor.clone(), config.monitor.stall_check_interval(), config.monitor.alert_threshold()).on_stall(Arc::new(|alert| {
            warn!(correlation_id = %alert.correlation_id, message = %alert.message, "workflow stall detected");
        })),
    );
    stall_detector.start();

    let http_handle = if let Some(addr) = cli.http_addr {
        let router = taskflow_facade::router(service.clone());
        let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("failed to bind façade listener on {addr}"))?;
        info!(%addr, "serving HTTP façade");
        Some(tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router).await {
                error!(%err, "façade server exited with an error");
            }
        }))
    } else {
        None
    };

    info!("taskflow-engine started; press Ctrl+C to shut down");
    shutdown_signal().await;
    info!("shutdown signal received, stopping background subsystems");

    poller.stop();
    scanner.stop();
    stall_detector.stop();
    if let Some(handle) = http_handle {
        handle.abort();
    }
    bus.disconnect().await.ok();

    info!("taskflow-engine stopped");
    Ok(())
}

fn build_monitor(config: &EngineConfig) -> Result<EventMonitor> {
    let monitor = EventMonitor::new(config.monitor.max_memory_log_entries);
    match &config.monitor.event_log_directory {
        Some(directory) => monitor.with_file_logging(directory, config.monitor.file_rotation_size_bytes).with_context(|| format!("failed to open event log directory {directory}")),
        None => Ok(monitor),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate()).expect("failed to install SIGTERM handler").recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
