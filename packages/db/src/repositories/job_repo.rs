//! Job repository: the authoritative store of job snapshots.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use queue_core::{Job, JobId, JobStatus, Lease, Operation};
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

/// Repository for job persistence operations.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

/// Internal record type for SurrealDB.
///
/// The record id is `job:<ulid>`; `job_id` repeats it as a plain field so
/// reads never have to decode SurrealDB record ids.
#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    job_id: String,
    kind: String,
    payload: String,
    status: JobStatus,
    progress: u8,
    #[serde(default)]
    attempts: u32,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    failure_reason: Option<String>,
    #[serde(default)]
    lease: Option<Lease>,
    available_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    finished_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl JobRecord {
    fn from_job(job: &Job) -> Result<Self, DbError> {
        Ok(Self {
            job_id: job.id.to_string(),
            kind: job.operation.kind.clone(),
            payload: serde_json::to_string(&job.operation.payload)?,
            status: job.status,
            progress: job.progress,
            attempts: job.attempts,
            result: job.result.as_ref().map(serde_json::to_string).transpose()?,
            failure_reason: job.failure_reason.clone(),
            lease: job.lease.clone(),
            available_at: job.available_at,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            updated_at: Utc::now(),
        })
    }

    fn into_job(self) -> Result<Job, DbError> {
        let id = JobId::parse(&self.job_id)
            .map_err(|e| DbError::Query(format!("Corrupt job id {}: {}", self.job_id, e)))?;
        Ok(Job {
            id,
            operation: Operation::new(self.kind, serde_json::from_str(&self.payload)?),
            status: self.status,
            progress: self.progress,
            attempts: self.attempts,
            result: self
                .result
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            failure_reason: self.failure_reason,
            lease: self.lease,
            available_at: self.available_at,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new job in the database.
    pub async fn create(&self, job: &Job) -> Result<Job, DbError> {
        if self.find(job.id).await?.is_some() {
            return Err(DbError::Duplicate(format!("Job already exists: {}", job.id)));
        }

        let record: Option<JobRecord> = self
            .db
            .create(("job", job.id.to_string()))
            .content(JobRecord::from_job(job)?)
            .await?;

        record
            .ok_or_else(|| DbError::Query("Failed to create job".into()))?
            .into_job()
    }

    /// Get a job by ID, if it exists.
    pub async fn find(&self, id: JobId) -> Result<Option<Job>, DbError> {
        let record: Option<JobRecord> = self.db.select(("job", id.to_string())).await?;
        record.map(JobRecord::into_job).transpose()
    }

    /// Get a job by ID.
    pub async fn get(&self, id: JobId) -> Result<Job, DbError> {
        self.find(id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))
    }

    /// Persist the state fields of `job` (status, lease, outcome, timestamps).
    ///
    /// Progress is written only when `progress` is given, so a transition
    /// never overwrites progress recorded by a running handler.
    pub async fn update_state(&self, job: &Job, progress: Option<u8>) -> Result<Job, DbError> {
        let mut patch = serde_json::json!({
            "status": job.status,
            "attempts": job.attempts,
            "result": job.result.as_ref().map(serde_json::to_string).transpose()?,
            "failure_reason": job.failure_reason,
            "lease": job.lease,
            "available_at": job.available_at,
            "started_at": job.started_at,
            "finished_at": job.finished_at,
            "updated_at": Utc::now(),
        });
        if let Some(progress) = progress {
            patch["progress"] = serde_json::json!(progress);
        }

        let record: Option<JobRecord> = self
            .db
            .update(("job", job.id.to_string()))
            .merge(patch)
            .await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", job.id)))?
            .into_job()
    }

    /// Raise the progress of an active attempt.
    ///
    /// Applies only while the job is still active under `attempt` and the new
    /// value is not lower than the stored one. Returns whether it applied.
    pub async fn record_progress(
        &self,
        id: JobId,
        attempt: u32,
        progress: u8,
    ) -> Result<bool, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET progress = $progress, updated_at = $now
                WHERE status = 'active' AND attempts = $attempt AND progress <= $progress
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("progress", progress.min(100)))
            .bind(("attempt", attempt))
            .bind(("now", Utc::now()))
            .await?;

        let records: Vec<JobRecord> = response.take(0)?;
        Ok(!records.is_empty())
    }

    /// Jobs that still need work (pending or active), oldest first.
    pub async fn list_unfinished(&self) -> Result<Vec<Job>, DbError> {
        let mut response = self
            .db
            .query("SELECT * FROM job WHERE status = 'pending' OR status = 'active'")
            .await?;

        let records: Vec<JobRecord> = response.take(0)?;
        let mut jobs = records
            .into_iter()
            .map(JobRecord::into_job)
            .collect::<Result<Vec<_>, _>>()?;
        jobs.sort_by_key(|job| (job.created_at, job.id));
        Ok(jobs)
    }

    /// List jobs in a given status, oldest first.
    pub async fn list_by_status(
        &self,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<Job>, DbError> {
        let mut response = self
            .db
            .query("SELECT * FROM job WHERE status = $status")
            .bind(("status", status))
            .await?;

        let records: Vec<JobRecord> = response.take(0)?;
        let mut jobs = records
            .into_iter()
            .map(JobRecord::into_job)
            .collect::<Result<Vec<_>, _>>()?;
        jobs.sort_by_key(|job| (job.created_at, job.id));
        jobs.truncate(limit);
        Ok(jobs)
    }

    /// Count jobs by status.
    pub async fn count_by_status(&self) -> Result<HashMap<JobStatus, u64>, DbError> {
        let mut response = self
            .db
            .query("SELECT status, count() AS count FROM job GROUP BY status")
            .await?;

        #[derive(Deserialize)]
        struct StatusCount {
            status: JobStatus,
            count: i64,
        }

        let counts: Vec<StatusCount> = response.take(0)?;

        Ok(counts
            .into_iter()
            .map(|c| (c.status, c.count.max(0) as u64))
            .collect())
    }
}
