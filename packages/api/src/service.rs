//! Submission, status and subscription boundary.

use std::sync::Arc;

use actors::{Broker, JobHandlerRegistry};
use bus::{BusError, Delivery, PubSub, Subscription};
use db::repositories::JobRepository;
use queue_core::{JobId, JobSnapshot, JobStatus, Operation, QueueError, Topic};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::realtime::JobEventStream;

/// Per-status job counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub pending: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobStats {
    pub fn total(&self) -> u64 {
        self.pending + self.active + self.completed + self.failed
    }
}

/// What producers and observers talk to.
#[derive(Clone)]
pub struct JobService {
    broker: Broker,
    handlers: Arc<JobHandlerRegistry>,
    bus: PubSub,
    store: JobRepository,
}

impl JobService {
    pub fn new(
        broker: Broker,
        handlers: Arc<JobHandlerRegistry>,
        bus: PubSub,
        store: JobRepository,
    ) -> Self {
        Self {
            broker,
            handlers,
            bus,
            store,
        }
    }

    /// Validate and enqueue an operation, returning its new job ID.
    ///
    /// Invalid operations are rejected here and never reach the queue.
    pub async fn submit(&self, operation: Operation) -> Result<JobId, QueueError> {
        self.handlers.validate(&operation)?;

        let job_id = JobId::new();
        self.broker.enqueue(operation, job_id).await?;
        Ok(job_id)
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<JobSnapshot, QueueError> {
        self.broker
            .get_status(job_id)
            .await?
            .ok_or(QueueError::NotFound(job_id))
    }

    /// Jobs in one status, oldest first.
    pub async fn list_jobs(
        &self,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<JobSnapshot>, QueueError> {
        let jobs = self
            .store
            .list_by_status(status, limit)
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        Ok(jobs.iter().map(|job| job.snapshot()).collect())
    }

    pub async fn stats(&self) -> Result<JobStats, QueueError> {
        let counts = self
            .store
            .count_by_status()
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        let count = |status: JobStatus| counts.get(&status).copied().unwrap_or(0);

        Ok(JobStats {
            pending: count(JobStatus::Pending),
            active: count(JobStatus::Active),
            completed: count(JobStatus::Completed),
            failed: count(JobStatus::Failed),
        })
    }

    pub fn subscribe_progress(
        &self,
        job_id: JobId,
    ) -> (Subscription, UnboundedReceiver<Delivery>) {
        self.bus.subscribe_channel(Topic::progress(job_id).as_str())
    }

    pub fn subscribe_lifecycle(
        &self,
        job_id: JobId,
    ) -> (Subscription, UnboundedReceiver<Delivery>) {
        self.bus.subscribe_channel(Topic::lifecycle(job_id).as_str())
    }

    /// Lifecycle events of every job.
    pub fn subscribe_all_lifecycle(
        &self,
    ) -> Result<(Subscription, UnboundedReceiver<Delivery>), BusError> {
        self.bus.subscribe_pattern_channel(Topic::all_lifecycle_pattern())
    }

    /// Progress and lifecycle of one job, framed for SSE.
    pub fn job_events(&self, job_id: JobId) -> Result<JobEventStream, BusError> {
        JobEventStream::new(&self.bus, job_id)
    }

    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.bus.unsubscribe(subscription);
    }

    pub fn bus(&self) -> &PubSub {
        &self.bus
    }

    pub fn operation_types(&self) -> Vec<&str> {
        self.handlers.operation_types()
    }
}
