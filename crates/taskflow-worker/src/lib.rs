//! The per-agent polling worker loop: claims assigned tasks, prioritizes
//! them, invokes a pluggable agent, and translates its verdict into
//! further commands and events.

pub mod agent;
pub mod error;
pub mod poller;
pub mod prioritizer;

pub use agent::{Agent, Verdict};
pub use error::{Result, WorkerError};
pub use poller::TaskPoller;
pub use prioritizer::prioritize;
