//! Per-attempt handle given to job handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use bus::PubSub;
use db::repositories::JobRepository;
use queue_core::{HandlerError, Job, JobId, LifecycleEvent, ProgressEvent, Topic};
use serde::Serialize;

struct ContextInner {
    job_id: JobId,
    attempt: u32,
    worker_id: String,
    bus: PubSub,
    store: JobRepository,
    progress: AtomicU8,
}

/// What a handler needs to report progress for one attempt.
///
/// Progress only ever moves forward within an attempt: a lower value than
/// the last one reported is raised to it.
#[derive(Clone)]
pub struct JobContext {
    inner: Arc<ContextInner>,
}

impl JobContext {
    pub fn new(job: &Job, worker_id: impl Into<String>, bus: PubSub, store: JobRepository) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                job_id: job.id,
                attempt: job.attempts,
                worker_id: worker_id.into(),
                bus,
                store,
                progress: AtomicU8::new(0),
            }),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.inner.job_id
    }

    pub fn attempt(&self) -> u32 {
        self.inner.attempt
    }

    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    /// Last progress value reported in this attempt.
    pub fn progress(&self) -> u8 {
        self.inner.progress.load(Ordering::SeqCst)
    }

    /// Mark `stage` as done: publish a progress event and store the value.
    pub async fn advance(&self, stage: &str, progress: u8) -> Result<(), HandlerError> {
        let event = self.progress_event(stage, progress);
        self.report(event).await
    }

    /// Like [`advance`](Self::advance) with a human-readable message.
    pub async fn advance_with(
        &self,
        stage: &str,
        progress: u8,
        message: impl Into<String>,
    ) -> Result<(), HandlerError> {
        let event = self.progress_event(stage, progress).with_message(message);
        self.report(event).await
    }

    /// Build an event for `stage` at the clamped, non-decreasing value.
    pub fn progress_event(&self, stage: &str, progress: u8) -> ProgressEvent {
        let requested = progress.min(100);
        let previous = self.inner.progress.fetch_max(requested, Ordering::SeqCst);
        ProgressEvent::new(self.job_id(), self.attempt(), stage, previous.max(requested))
    }

    async fn report(&self, event: ProgressEvent) -> Result<(), HandlerError> {
        self.publish_progress(&event);

        let applied = self
            .inner
            .store
            .record_progress(self.job_id(), self.attempt(), event.progress)
            .await
            .map_err(|e| HandlerError::transient(format!("failed to record progress: {}", e)))?;
        if !applied {
            tracing::debug!(
                "Progress for job {} attempt {} from {} no longer applies",
                self.job_id(),
                self.attempt(),
                self.worker_id()
            );
        }
        Ok(())
    }

    /// Publish on the job's progress topic without touching the store.
    pub fn publish_progress(&self, event: &ProgressEvent) {
        self.publish(&Topic::progress(self.job_id()), event);
    }

    pub fn publish_lifecycle(&self, event: &LifecycleEvent) {
        self.publish(&Topic::lifecycle(self.job_id()), event);
    }

    /// Best-effort publish; a bus failure never fails the job.
    pub fn publish<E: Serialize + ?Sized>(&self, topic: &Topic, event: &E) {
        if let Err(e) = self.inner.bus.publish(topic.as_str(), event) {
            tracing::warn!("Failed to publish on {}: {}", topic, e);
        }
    }
}
