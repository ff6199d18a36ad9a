//! Core domain types for the job queue system.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobStatus and Operation for work items
//! - ProgressEvent, LifecycleEvent and Topic for real-time updates
//! - RetryPolicy and BrokerConfig for dispatch behavior
//! - The error taxonomy and typed payload validation

mod error;
mod events;
mod job;
mod policy;
mod validation;

pub use error::{HandlerError, QueueError, ValidationError};
pub use events::{LifecycleEvent, ProgressEvent, Topic, UsageEvent};
pub use job::{Job, JobId, JobSnapshot, JobStatus, Lease, Operation};
pub use policy::{BrokerConfig, RequeueDecision, RetryPolicy};
pub use validation::{Validate, decode_payload, require_http_url, require_non_empty};
