use crate::events::{Command, DomainEvent};

/// A pre-publish middleware seam: a first-class hook point rather than
/// a monkey-patched interceptor.
///
/// [`super::MessageBus`] holds an ordered list of hooks and invokes them,
/// in order, immediately before a message reaches the transport. Hooks
/// are synchronous and must not block — the event monitor's hook does a
/// bounded, lock-guarded insert and nothing else.
pub trait PublishHook: Send + Sync + std::fmt::Debug {
    fn on_event(&self, event: &DomainEvent);
    fn on_command(&self, command: &Command);
}
