//! In-process bus backend: tokio tasks and channels stand in for a
//! broker. Used by the bootstrap binary's quick-start mode and by every
//! unit/integration test.

use super::{CommandCallback, EventCallback};
use crate::error::{MessagingError, MessagingResult};
use crate::events::{Command, DomainEvent};
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

struct EventSubscriber {
    queue_name: Option<String>,
    callback: Arc<EventCallback>,
}

/// A named command queue: a channel feeding a single consumer task that
/// drains it serially, so "one consumer per queue processes a command to
/// completion before the next" holds without any extra locking.
struct CommandQueue {
    sender: mpsc::UnboundedSender<Command>,
    consumer: JoinHandle<()>,
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}

#[derive(Default)]
pub struct InMemoryBus {
    connected: AtomicBool,
    event_subscribers: DashMap<String, Vec<EventSubscriber>>,
    command_queues: DashMap<String, CommandQueue>,
}

impl std::fmt::Debug for EventSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscriber").field("queue_name", &self.queue_name).finish()
    }
}

impl std::fmt::Debug for InMemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBus")
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .field("event_types", &self.event_subscribers.len())
            .field("command_queues", &self.command_queues.len())
            .finish()
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(&self) -> MessagingResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Idempotent. Drops every auto-delete (no `queue_name`) event
    /// subscription; named command queues and durable event bindings
    /// are left intact for reconnection.
    pub async fn disconnect(&self) -> MessagingResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        for mut entry in self.event_subscribers.iter_mut() {
            entry.value_mut().retain(|s| s.queue_name.is_some());
        }
        Ok(())
    }

    /// Fans the event out to every subscriber of its `event_type`.
    /// Dispatch is "synchronous-async": one in-flight task per
    /// subscriber, awaited before `publish_event` returns.
    /// Ordering between subscribers is unspecified; each individual
    /// subscriber still sees FIFO delivery because we await this batch
    /// fully before the next `publish_event` call can start a new one.
    pub async fn publish_event(&self, event: DomainEvent) -> MessagingResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(MessagingError::NotConnected);
        }
        let event_type = event.event_type().to_string();
        let callbacks: Vec<Arc<EventCallback>> = match self.event_subscribers.get(&event_type) {
            Some(subs) => subs.iter().map(|s| s.callback.clone()).collect(),
            None => return Ok(()),
        };

        let tasks: Vec<_> = callbacks
            .into_iter()
            .map(|callback| {
                let event = event.clone();
                tokio::spawn(async move { callback(event).await })
            })
            .collect();

        for result in join_all(tasks).await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(event_type = %event_type, error = %err, "event subscriber failed"),
                Err(join_err) => error!(event_type = %event_type, error = %join_err, "event subscriber task panicked"),
            }
        }
        Ok(())
    }

    pub async fn subscribe_to_event(&self, event_type: &str, queue_name: Option<String>, callback: Arc<EventCallback>) -> MessagingResult<()> {
        self.event_subscribers.entry(event_type.to_string()).or_default().push(EventSubscriber { queue_name, callback });
        Ok(())
    }

    /// Resolves the queue the command type is delivered to, creating a
    /// single-consumer drain loop on first registration.
    pub async fn subscribe_to_command(&self, command_type: &str, queue_name: Option<String>, callback: Arc<CommandCallback>) -> MessagingResult<()> {
        let queue = queue_name.unwrap_or_else(|| command_type.to_string());
        if self.command_queues.contains_key(&queue) {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        let queue_label = queue.clone();
        let consumer = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                if let Err(err) = callback(command).await {
                    warn!(queue = %queue_label, error = %err, "command consumer failed");
                }
            }
        });
        self.command_queues.insert(queue, CommandQueue { sender: tx, consumer });
        Ok(())
    }

    pub async fn publish_command(&self, command: Command) -> MessagingResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(MessagingError::NotConnected);
        }
        let queue = command.command_type().to_string();
        match self.command_queues.get(&queue) {
            Some(entry) => entry.sender.send(command).map_err(|_| MessagingError::NoConsumer(queue)),
            None => Err(MessagingError::NoConsumer(queue)),
        }
    }
}
