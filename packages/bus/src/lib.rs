//! Publish/subscribe bus for job progress and lifecycle events.
//!
//! Topics are plain strings created on first use. Delivery is best-effort:
//! ordered per topic for each subscriber, never persisted, never replayed.

mod pattern;
mod pubsub;

pub use pattern::TopicPattern;
pub use pubsub::{Delivery, PubSub, Subscription};

/// Bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Invalid topic pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Failed to serialize event for {topic}: {reason}")]
    Serialize { topic: String, reason: String },

    #[error("Callback subscriptions need a running Tokio runtime")]
    NoRuntime,
}
