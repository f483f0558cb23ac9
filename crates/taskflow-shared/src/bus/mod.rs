//! The domain event bus: broker-agnostic publish/subscribe for events
//! (fanout) and commands (single consumer per named queue).

mod broker;
mod hooks;
mod in_memory;

pub use broker::BrokerBus;
pub use hooks::PublishHook;
pub use in_memory::InMemoryBus;

use crate::error::{MessagingError, MessagingResult};
use crate::events::{Command, DomainEvent};
use crate::resilience::{is_retryable_by_name, RetryController};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

pub type EventCallback = dyn Fn(DomainEvent) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync;
pub type CommandCallback = dyn Fn(Command) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync;

/// The concrete transport behind [`MessageBus`]. An enum over two
/// backends rather than a trait object: matches the reference engine's
/// `MessagingProvider` choice of enum dispatch over `dyn Trait` for its
/// hot publish/consume path.
#[derive(Debug)]
enum BusBackend {
    InMemory(InMemoryBus),
    Broker(BrokerBus),
}

impl BusBackend {
    async fn connect(&self) -> MessagingResult<()> {
        match self {
            BusBackend::InMemory(b) => b.connect().await,
            BusBackend::Broker(b) => b.connect().await,
        }
    }

    async fn disconnect(&self) -> MessagingResult<()> {
        match self {
            BusBackend::InMemory(b) => b.disconnect().await,
            BusBackend::Broker(b) => b.disconnect().await,
        }
    }

    async fn publish_event(&self, event: DomainEvent) -> MessagingResult<()> {
        match self {
            BusBackend::InMemory(b) => b.publish_event(event).await,
            BusBackend::Broker(b) => b.publish_event(event).await,
        }
    }

    async fn subscribe_to_event(&self, event_type: &str, queue_name: Option<String>, callback: Arc<EventCallback>) -> MessagingResult<()> {
        match self {
            BusBackend::InMemory(b) => b.subscribe_to_event(event_type, queue_name, callback).await,
            BusBackend::Broker(b) => b.subscribe_to_event(event_type, queue_name, callback).await,
        }
    }

    async fn publish_command(&self, command: Command) -> MessagingResult<()> {
        match self {
            BusBackend::InMemory(b) => b.publish_command(command).await,
            BusBackend::Broker(b) => b.publish_command(command).await,
        }
    }

    async fn subscribe_to_command(&self, command_type: &str, queue_name: Option<String>, callback: Arc<CommandCallback>) -> MessagingResult<()> {
        match self {
            BusBackend::InMemory(b) => b.subscribe_to_command(command_type, queue_name, callback).await,
            BusBackend::Broker(b) => b.subscribe_to_command(command_type, queue_name, callback).await,
        }
    }
}

/// The domain-shaped messaging facade every subsystem depends on.
///
/// Wraps a concrete [`BusBackend`] plus an ordered chain of
/// [`PublishHook`]s applied immediately before a message reaches the
/// transport. A struct, not a trait object — callers clone the
/// `Arc<MessageBus>`, never depend on `dyn MessageBus`.
#[derive(Clone)]
pub struct MessageBus {
    backend: Arc<BusBackend>,
    hooks: Arc<Vec<Arc<dyn PublishHook>>>,
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus").field("hooks", &self.hooks.len()).finish()
    }
}

impl MessageBus {
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(BusBackend::InMemory(InMemoryBus::new())),
            hooks: Arc::new(Vec::new()),
        }
    }

    pub fn broker(config: crate::config::BrokerConfig) -> Self {
        Self {
            backend: Arc::new(BusBackend::Broker(BrokerBus::new(config))),
            hooks: Arc::new(Vec::new()),
        }
    }

    /// Installs `hooks`, in order. Must be called before `connect` is
    /// observed by any publisher; in practice this means at
    /// construction time, before the bus is handed to the scanner,
    /// poller, or façade.
    pub fn with_hooks(mut self, hooks: Vec<Arc<dyn PublishHook>>) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub async fn connect(&self) -> MessagingResult<()> {
        self.backend.connect().await
    }

    pub async fn disconnect(&self) -> MessagingResult<()> {
        self.backend.disconnect().await
    }

    /// Routes on `event.event_type()`. Safe to call from any task;
    /// enqueueing does not wait on every subscriber's own downstream
    /// I/O, only on the subscriber callbacks themselves completing.
    pub async fn publish_event(&self, event: DomainEvent) -> MessagingResult<()> {
        for hook in self.hooks.iter() {
            hook.on_event(&event);
        }
        self.backend.publish_event(event).await
    }

    /// Registers `callback` for `event_type`. When `queue_name` is
    /// `None` the binding auto-deletes on disconnect.
    pub async fn subscribe_to_event(&self, event_type: &str, callback: Arc<EventCallback>, queue_name: Option<String>) -> MessagingResult<()> {
        self.backend.subscribe_to_event(event_type, queue_name, callback).await
    }

    /// As [`Self::subscribe_to_event`], but wraps the callback with a
    /// [`RetryController`]: a callback failure is classified by
    /// `error_is_retryable` and handed to the controller's backoff
    /// schedule rather than simply logged.
    pub async fn subscribe_to_event_with_retry(
        &self,
        event_type: &str,
        callback: Arc<EventCallback>,
        queue_name: Option<String>,
        retry: Arc<RetryController>,
    ) -> MessagingResult<()> {
        let wrapped = wrap_event_callback_with_retry(callback, retry);
        self.backend.subscribe_to_event(event_type, queue_name, wrapped).await
    }

    pub async fn publish_command(&self, command: Command) -> MessagingResult<()> {
        for hook in self.hooks.iter() {
            hook.on_command(&command);
        }
        self.backend.publish_command(command).await
    }

    pub async fn subscribe_to_command(&self, command_type: &str, callback: Arc<CommandCallback>, queue_name: Option<String>) -> MessagingResult<()> {
        self.backend.subscribe_to_command(command_type, queue_name, callback).await
    }

    pub async fn subscribe_to_command_with_retry(
        &self,
        command_type: &str,
        callback: Arc<CommandCallback>,
        queue_name: Option<String>,
        retry: Arc<RetryController>,
    ) -> MessagingResult<()> {
        let wrapped = wrap_command_callback_with_retry(callback, retry);
        self.backend.subscribe_to_command(command_type, queue_name, wrapped).await
    }
}

fn wrap_event_callback_with_retry(callback: Arc<EventCallback>, retry: Arc<RetryController>) -> Arc<EventCallback> {
    Arc::new(move |event: DomainEvent| {
        let callback = callback.clone();
        let retry = retry.clone();
        Box::pin(async move {
            let message_id = event.envelope.id.clone();
            let result = callback(event.clone()).await;
            if let Err(err) = &result {
                let message = serde_json::to_value(&event).unwrap_or(serde_json::Value::Null);
                let retryable = is_retryable_by_name(err);
                let retry_callback = make_retry_callback(callback);
                retry.handle_failure(message_id, message, 0, err.clone(), retryable, Arc::new(retry_callback)).await;
            }
            result
        })
    })
}

fn wrap_command_callback_with_retry(callback: Arc<CommandCallback>, retry: Arc<RetryController>) -> Arc<CommandCallback> {
    Arc::new(move |command: Command| {
        let callback = callback.clone();
        let retry = retry.clone();
        Box::pin(async move {
            let message_id = command.envelope.id.clone();
            let result = callback(command.clone()).await;
            if let Err(err) = &result {
                let message = serde_json::to_value(&command).unwrap_or(serde_json::Value::Null);
                let retryable = is_retryable_by_name(err);
                let command_for_retry = command;
                let callback = callback.clone();
                let retry_callback: crate::resilience::RetryCallback = Box::new(move |_value| {
                    let callback = callback.clone();
                    let command = command_for_retry.clone();
                    Box::pin(async move { callback(command).await })
                });
                retry.handle_failure(message_id, message, 0, err.clone(), retryable, Arc::new(retry_callback)).await;
            }
            result
        })
    })
}

fn make_retry_callback(callback: Arc<EventCallback>) -> crate::resilience::RetryCallback {
    Box::new(move |message: serde_json::Value| {
        let callback = callback.clone();
        Box::pin(async move {
            match serde_json::from_value::<DomainEvent>(message) {
                Ok(event) => callback(event).await,
                Err(err) => {
                    warn!(error = %err, "failed to deserialize retried event");
                    Err(err.to_string())
                }
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPayload;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn boxed_event_callback<F>(f: F) -> Arc<EventCallback>
    where
        F: Fn(DomainEvent) -> Result<(), String> + Send + Sync + 'static,
    {
        Arc::new(move |event| {
            let result = f(event);
            Box::pin(async move { result })
        })
    }

    fn sample_event() -> DomainEvent {
        DomainEvent::new(EventPayload::TaskCreated {
            task_id: "t1".into(),
            title: "T".into(),
            description: "D".into(),
            priority: "medium".into(),
            created_by: "u1".into(),
        })
    }

    #[tokio::test]
    async fn in_memory_bus_round_trips_a_published_event() {
        let bus = MessageBus::in_memory();
        bus.connect().await.unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.subscribe_to_event("TASK_CREATED", boxed_event_callback(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }), None)
        .await
        .unwrap();

        bus.publish_event(sample_event()).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hooks_observe_every_published_event() {
        #[derive(Debug)]
        struct CountingHook(Arc<AtomicUsize>);
        impl PublishHook for CountingHook {
            fn on_event(&self, _event: &DomainEvent) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            fn on_command(&self, _command: &Command) {}
        }

        let seen = Arc::new(AtomicUsize::new(0));
        let bus = MessageBus::in_memory().with_hooks(vec![Arc::new(CountingHook(seen.clone()))]);
        bus.connect().await.unwrap();

        bus.publish_event(sample_event()).await.unwrap();
        bus.publish_event(sample_event()).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
