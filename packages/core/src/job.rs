//! Job domain types for work items in the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The typed operation a job executes.
///
/// `kind` selects the handler; the shape of `payload` is owned entirely by
/// that handler's decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
}

impl Operation {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Current status of a job in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting to be leased.
    #[default]
    Pending,
    /// Job is leased by a worker.
    Active,
    /// Job completed successfully.
    Completed,
    /// Job failed and will not be retried.
    Failed,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// `Active -> Pending` only happens through lease expiry or a retry
    /// decision, both owned by the broker.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Active)
                | (JobStatus::Active, JobStatus::Pending)
                | (JobStatus::Active, JobStatus::Completed)
                | (JobStatus::Active, JobStatus::Failed)
        )
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time-bounded exclusive claim on a job by one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub worker_id: String,
    /// Attempt number this lease belongs to; stale reports carry an older one.
    pub attempt: u32,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A job represents a unit of work to be executed by the queue system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// The operation to execute.
    pub operation: Operation,
    /// Current status.
    pub status: JobStatus,
    /// Progress of the current attempt, 0-100.
    pub progress: u8,
    /// Number of leases granted so far.
    #[serde(default)]
    pub attempts: u32,
    /// Handler output, only set once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure message, only set once failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Active lease, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
    /// Earliest instant the job may be leased.
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(id: JobId, operation: Operation) -> Self {
        let now = Utc::now();
        Self {
            id,
            operation,
            status: JobStatus::Pending,
            progress: 0,
            attempts: 0,
            result: None,
            failure_reason: None,
            lease: None,
            available_at: now,
            created_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Type tag of the operation this job runs.
    pub fn kind(&self) -> &str {
        &self.operation.kind
    }

    /// Status view exposed to callers.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            kind: self.operation.kind.clone(),
            status: self.status,
            progress: self.progress,
            attempts: self.attempts,
            result: self.result.clone(),
            failure_reason: self.failure_reason.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Read-only snapshot of a job's tracked state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: JobId,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: JobStatus,
    pub progress: u8,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Active));
        assert!(JobStatus::Active.can_transition_to(JobStatus::Pending));
        assert!(JobStatus::Active.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Active));
    }

    #[test]
    fn operation_serializes_with_type_tag() {
        let op = Operation::new("usage.record", serde_json::json!({ "userId": "u1" }));
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["type"], "usage.record");
        assert_eq!(value["payload"]["userId"], "u1");
    }

    #[test]
    fn new_job_is_pending_without_outcome() {
        let job = Job::new(JobId::new(), Operation::new("x", serde_json::json!({})));
        let snapshot = job.snapshot();
        assert_eq!(snapshot.status, JobStatus::Pending);
        assert_eq!(snapshot.progress, 0);
        assert!(snapshot.result.is_none());
        assert!(snapshot.failure_reason.is_none());
        assert!(snapshot.started_at.is_none());
    }
}
