//! Job queue runtime and its outward surface.
//!
//! [`Runtime`] wires the database, event bus, broker, worker pool and
//! handlers together. Producers and observers use the [`JobService`] it
//! hands out: submit operations, read job status, and subscribe to
//! progress and lifecycle topics, optionally framed as SSE.

mod config;
mod realtime;
mod runtime;
mod service;

pub use config::{ConfigError, RuntimeConfig};
pub use realtime::{JobEventStream, event_class, format_sse};
pub use runtime::{Runtime, RuntimeError};
pub use service::{JobService, JobStats};

// Re-export core types for convenience
pub use bus::{Delivery, Subscription};
pub use queue_core::{
    HandlerError, Job, JobId, JobSnapshot, JobStatus, LifecycleEvent, Operation, ProgressEvent,
    QueueError, Topic, UsageEvent, ValidationError,
};
