//! Event types for real-time updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Logical publish/subscribe address derived from an entity id and an event
/// class. Topics exist implicitly; there is nothing to create or delete.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Stage progress for one job.
    pub fn progress(job_id: JobId) -> Self {
        Self(format!("job:{job_id}:progress"))
    }

    /// Start/retry/terminal events for one job.
    pub fn lifecycle(job_id: JobId) -> Self {
        Self(format!("job:{job_id}:lifecycle"))
    }

    /// Usage accounting for one user.
    pub fn usage(user_id: &str) -> Self {
        Self(format!("user:{user_id}:usage"))
    }

    /// Pattern matching the lifecycle topic of every job.
    pub fn all_lifecycle_pattern() -> &'static str {
        "job:*:lifecycle"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stage transition published on a job's progress topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: JobId,
    /// Handler-defined stage label.
    pub stage: String,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(job_id: JobId, attempt: u32, stage: impl Into<String>, progress: u8) -> Self {
        Self {
            job_id,
            stage: stage.into(),
            progress: progress.min(100),
            message: None,
            error: None,
            attempt,
            timestamp: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Events published on a job's lifecycle topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A worker leased the job.
    Started {
        job_id: JobId,
        worker_id: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    /// An attempt failed and the job was requeued.
    Retrying {
        job_id: JobId,
        attempt: u32,
        delay_ms: u64,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// The job completed successfully.
    Completed {
        job_id: JobId,
        result: serde_json::Value,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    /// The job failed for good.
    Failed {
        job_id: JobId,
        reason: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    /// Whether this event ends the job's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::Completed { .. } | LifecycleEvent::Failed { .. }
        )
    }

    /// Get the job ID associated with this event.
    pub fn job_id(&self) -> JobId {
        match self {
            LifecycleEvent::Started { job_id, .. }
            | LifecycleEvent::Retrying { job_id, .. }
            | LifecycleEvent::Completed { job_id, .. }
            | LifecycleEvent::Failed { job_id, .. } => *job_id,
        }
    }
}

/// Usage accounting event published on a user's usage topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    pub user_id: String,
    pub kind: String,
    pub quantity: u64,
    /// Running total for `kind` after this record.
    pub total: u64,
    pub job_id: JobId,
    pub timestamp: DateTime<Utc>,
}
