//! Broker actor: the single authority over job state transitions.
//!
//! Every enqueue, lease, ack and fail is a message to one actor, so two
//! workers can never be granted the same job. The broker keeps the
//! unfinished jobs in memory for dispatch and writes every transition
//! through to the job store before replying.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use db::DbError;
use db::repositories::JobRepository;
use queue_core::{
    BrokerConfig, HandlerError, Job, JobId, JobSnapshot, JobStatus, Lease, Operation, QueueError,
    RequeueDecision,
};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort, SpawnErr};
use tokio::task::JoinHandle;

use crate::messages::BrokerMessage;

/// A worker parked until a job becomes eligible.
struct Waiter {
    worker_id: String,
    reply: RpcReplyPort<Option<Job>>,
}

/// State for the broker actor.
pub struct BrokerState {
    store: JobRepository,
    config: BrokerConfig,
    /// Unfinished jobs by ID.
    jobs: HashMap<JobId, Job>,
    /// Eligible pending jobs, oldest first.
    ready: BTreeSet<(DateTime<Utc>, JobId)>,
    /// Pending jobs waiting out a retry delay, soonest first.
    delayed: BTreeSet<(DateTime<Utc>, JobId)>,
    waiters: VecDeque<Waiter>,
    /// Set once waiters were released; no more leases are granted.
    closed: bool,
}

fn storage(e: DbError) -> QueueError {
    QueueError::Storage(e.to_string())
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    now + chrono::Duration::milliseconds(delay.as_millis() as i64)
}

fn requeue_now(job: &mut Job, now: DateTime<Utc>) {
    job.status = JobStatus::Pending;
    job.lease = None;
    job.progress = 0;
    job.available_at = now;
}

impl BrokerState {
    fn new(store: JobRepository, config: BrokerConfig) -> Self {
        Self {
            store,
            config,
            jobs: HashMap::new(),
            ready: BTreeSet::new(),
            delayed: BTreeSet::new(),
            waiters: VecDeque::new(),
            closed: false,
        }
    }

    fn schedule(&mut self, job: &Job) {
        if job.available_at > Utc::now() {
            self.delayed.insert((job.available_at, job.id));
        } else {
            self.ready.insert((job.created_at, job.id));
        }
    }

    fn unschedule(&mut self, job: &Job) {
        self.ready.remove(&(job.created_at, job.id));
        self.delayed.remove(&(job.available_at, job.id));
    }

    /// Reload unfinished jobs. Jobs left active by a previous run lost their
    /// worker with it, so they go straight back to pending.
    async fn recover(&mut self) -> Result<usize, DbError> {
        let unfinished = self.store.list_unfinished().await?;
        let count = unfinished.len();
        let now = Utc::now();

        for mut job in unfinished {
            if job.status == JobStatus::Active {
                tracing::warn!("Requeueing job {} left active by a previous run", job.id);
                requeue_now(&mut job, now);
                self.store.update_state(&job, Some(0)).await?;
            }
            self.schedule(&job);
            self.jobs.insert(job.id, job);
        }

        Ok(count)
    }

    fn promote_due(&mut self, now: DateTime<Utc>) {
        while let Some(&(at, id)) = self.delayed.first() {
            if at > now {
                break;
            }
            self.delayed.pop_first();
            if let Some(job) = self.jobs.get(&id) {
                self.ready.insert((job.created_at, id));
            }
        }
    }

    async fn enqueue(&mut self, id: JobId, operation: Operation) -> Result<JobSnapshot, QueueError> {
        if self.jobs.contains_key(&id) {
            return Err(QueueError::DuplicateJob(id));
        }

        let job = Job::new(id, operation);
        self.store.create(&job).await.map_err(|e| match e {
            DbError::Duplicate(_) => QueueError::DuplicateJob(id),
            other => storage(other),
        })?;

        tracing::info!("Enqueued job {} ({})", id, job.kind());
        let snapshot = job.snapshot();
        self.schedule(&job);
        self.jobs.insert(id, job);
        Ok(snapshot)
    }

    /// Lease the oldest eligible job to `worker_id`.
    ///
    /// Returns the leased job together with its state before the lease, so
    /// the grant can be undone if the worker is gone.
    async fn grant(&mut self, worker_id: &str) -> Result<Option<(Job, Job)>, DbError> {
        self.promote_due(Utc::now());

        while let Some((created_at, id)) = self.ready.pop_first() {
            let Some(previous) = self.jobs.get(&id).cloned() else {
                continue;
            };
            if previous.status != JobStatus::Pending {
                continue;
            }

            let now = Utc::now();
            let mut job = previous.clone();
            job.status = JobStatus::Active;
            job.attempts += 1;
            job.progress = 0;
            job.started_at.get_or_insert(now);
            job.lease = Some(Lease {
                worker_id: worker_id.to_string(),
                attempt: job.attempts,
                expires_at: after(now, self.config.lease_timeout()),
            });

            if let Err(e) = self.store.update_state(&job, Some(0)).await {
                self.ready.insert((created_at, id));
                return Err(e);
            }

            tracing::debug!("Leased job {} to {} (attempt {})", id, worker_id, job.attempts);
            self.jobs.insert(id, job.clone());
            return Ok(Some((job, previous)));
        }

        Ok(None)
    }

    async fn revert(&mut self, previous: Job) {
        if let Err(e) = self.store.update_state(&previous, Some(previous.progress)).await {
            tracing::warn!("Failed to revert lease on job {}: {}", previous.id, e);
        }
        self.schedule(&previous);
        self.jobs.insert(previous.id, previous);
    }

    async fn serve_waiters(&mut self) {
        if self.closed {
            return;
        }
        while let Some(waiter) = self.waiters.pop_front() {
            match self.grant(&waiter.worker_id).await {
                Ok(Some((job, previous))) => {
                    if waiter.reply.send(Some(job)).is_err() {
                        tracing::debug!("Lease waiter {} went away", waiter.worker_id);
                        self.revert(previous).await;
                    }
                }
                Ok(None) => {
                    self.waiters.push_front(waiter);
                    break;
                }
                Err(e) => {
                    tracing::warn!("Failed to lease job for {}: {}", waiter.worker_id, e);
                    self.waiters.push_front(waiter);
                    break;
                }
            }
        }
    }

    fn release_waiters(&mut self) {
        self.closed = true;
        let count = self.waiters.len();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.reply.send(None);
        }
        if count > 0 {
            tracing::info!("Released {} waiting worker(s)", count);
        }
    }

    async fn ack(
        &mut self,
        id: JobId,
        attempt: u32,
        result: serde_json::Value,
    ) -> Result<bool, QueueError> {
        match self.jobs.get(&id) {
            Some(current) if current.status == JobStatus::Active && current.attempts == attempt => {
                let mut job = current.clone();
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.result = Some(result);
                job.failure_reason = None;
                job.lease = None;
                job.finished_at = Some(Utc::now());

                self.store.update_state(&job, Some(100)).await.map_err(storage)?;
                tracing::info!("Job {} completed after {} attempt(s)", id, job.attempts);
                self.unschedule(&job);
                self.jobs.remove(&id);
                Ok(true)
            }
            Some(_) => {
                tracing::warn!(
                    "Ignoring stale ack for job {} from attempt {}",
                    id,
                    attempt
                );
                Ok(false)
            }
            None => match self.store.find(id).await.map_err(storage)? {
                Some(job) if job.status == JobStatus::Completed => Ok(false),
                Some(job) => {
                    tracing::warn!("Ignoring ack for job {} in status {}", id, job.status);
                    Ok(false)
                }
                None => Err(QueueError::NotFound(id)),
            },
        }
    }

    async fn fail(
        &mut self,
        id: JobId,
        attempt: u32,
        error: HandlerError,
    ) -> Result<RequeueDecision, QueueError> {
        let Some(current) = self.jobs.get(&id) else {
            return match self.store.find(id).await.map_err(storage)? {
                Some(_) => Ok(RequeueDecision::Discarded),
                None => Err(QueueError::NotFound(id)),
            };
        };

        if current.status != JobStatus::Active || current.attempts != attempt {
            tracing::debug!("Discarding failure report for job {} attempt {}", id, attempt);
            return Ok(RequeueDecision::Discarded);
        }

        let mut job = current.clone();
        let now = Utc::now();
        let decision = if error.is_terminal() {
            RequeueDecision::Terminal
        } else {
            self.config.retry.decide(attempt)
        };
        job.lease = None;

        match decision {
            RequeueDecision::Retry { delay, .. } => {
                job.status = JobStatus::Pending;
                job.progress = 0;
                job.available_at = after(now, delay);
                self.store.update_state(&job, Some(0)).await.map_err(storage)?;

                tracing::warn!(
                    "Job {} attempt {} failed: {}; retrying in {:?}",
                    id,
                    attempt,
                    error,
                    delay
                );
                self.schedule(&job);
                self.jobs.insert(id, job);
            }
            RequeueDecision::Terminal => {
                job.status = JobStatus::Failed;
                job.failure_reason = Some(error.message().to_string());
                job.finished_at = Some(now);
                self.store.update_state(&job, None).await.map_err(storage)?;

                tracing::error!("Job {} failed after {} attempt(s): {}", id, attempt, error);
                self.unschedule(&job);
                self.jobs.remove(&id);
            }
            RequeueDecision::Discarded => {}
        }

        Ok(decision)
    }

    /// Return jobs whose lease ran out to the pending set.
    async fn expire_leases(&mut self, now: DateTime<Utc>) {
        let expired: Vec<JobId> = self
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Active)
            .filter(|job| job.lease.as_ref().is_some_and(|lease| lease.is_expired(now)))
            .map(|job| job.id)
            .collect();

        for id in expired {
            let Some(mut job) = self.jobs.get(&id).cloned() else {
                continue;
            };
            let holder = job
                .lease
                .as_ref()
                .map(|lease| lease.worker_id.clone())
                .unwrap_or_default();

            requeue_now(&mut job, now);
            if let Err(e) = self.store.update_state(&job, Some(0)).await {
                tracing::warn!("Failed to requeue expired job {}: {}", id, e);
                continue;
            }

            tracing::warn!("Lease on job {} held by {} expired; requeued", id, holder);
            self.schedule(&job);
            self.jobs.insert(id, job);
        }
    }
}

/// Broker actor arguments.
pub struct BrokerArgs {
    pub store: JobRepository,
    pub config: BrokerConfig,
}

/// Broker actor that owns dispatch state.
pub struct BrokerActor;

impl Actor for BrokerActor {
    type Msg = BrokerMessage;
    type State = BrokerState;
    type Arguments = BrokerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting job broker");

        let mut state = BrokerState::new(args.store, args.config);
        let recovered = state.recover().await?;
        if recovered > 0 {
            tracing::info!("Recovered {} unfinished job(s)", recovered);
        }

        // Drive lease expiry and delayed retries
        let tick = state.config.tick_interval();
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                if myself_clone.send_message(BrokerMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            BrokerMessage::Enqueue {
                job_id,
                operation,
                reply,
            } => {
                let result = state.enqueue(job_id, operation).await;
                let accepted = result.is_ok();
                let _ = reply.send(result);
                if accepted {
                    state.serve_waiters().await;
                }
            }

            BrokerMessage::Lease { reply, .. } if state.closed => {
                let _ = reply.send(None);
            }

            BrokerMessage::Lease {
                worker_id,
                wait,
                reply,
            } => match state.grant(&worker_id).await {
                Ok(Some((job, previous))) => {
                    if reply.send(Some(job)).is_err() {
                        state.revert(previous).await;
                    }
                }
                Ok(None) if wait => state.waiters.push_back(Waiter { worker_id, reply }),
                Ok(None) => {
                    let _ = reply.send(None);
                }
                Err(e) => {
                    tracing::warn!("Failed to lease job for {}: {}", worker_id, e);
                    if wait {
                        state.waiters.push_back(Waiter { worker_id, reply });
                    } else {
                        let _ = reply.send(None);
                    }
                }
            },

            BrokerMessage::Ack {
                job_id,
                attempt,
                result,
                reply,
            } => {
                let _ = reply.send(state.ack(job_id, attempt, result).await);
            }

            BrokerMessage::Fail {
                job_id,
                attempt,
                error,
                reply,
            } => {
                let result = state.fail(job_id, attempt, error).await;
                let requeued = matches!(result, Ok(RequeueDecision::Retry { .. }));
                let _ = reply.send(result);
                if requeued {
                    state.serve_waiters().await;
                }
            }

            BrokerMessage::GetStatus { job_id, reply } => {
                let result = state.store.find(job_id).await;
                let _ = reply.send(result.map(|job| job.map(|j| j.snapshot())).map_err(storage));
            }

            BrokerMessage::ReleaseWaiters => state.release_waiters(),

            BrokerMessage::Shutdown => {
                tracing::info!("Shutting down job broker");
                state.release_waiters();
                myself.stop(None);
            }

            BrokerMessage::Tick => {
                state.expire_leases(Utc::now()).await;
                state.serve_waiters().await;
            }
        }

        Ok(())
    }
}

/// Cloneable handle to the broker actor.
#[derive(Clone)]
pub struct Broker {
    actor: ActorRef<BrokerMessage>,
}

impl Broker {
    /// Spawn the broker, recovering unfinished jobs from `store`.
    pub async fn start(
        store: JobRepository,
        config: BrokerConfig,
    ) -> Result<(Self, JoinHandle<()>), SpawnErr> {
        let (actor, handle) = Actor::spawn(None, BrokerActor, BrokerArgs { store, config }).await?;
        Ok((Self { actor }, handle))
    }

    pub fn actor(&self) -> &ActorRef<BrokerMessage> {
        &self.actor
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(RpcReplyPort<T>) -> BrokerMessage,
    ) -> Result<T, QueueError>
    where
        T: Send + 'static,
    {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(build(tx.into()))
            .map_err(|e| QueueError::Unavailable(format!("{}", e)))?;
        rx.await
            .map_err(|_| QueueError::Unavailable("broker dropped the request".into()))
    }

    /// Record a new pending job under a caller-chosen ID.
    pub async fn enqueue(&self, operation: Operation, job_id: JobId) -> Result<JobSnapshot, QueueError> {
        self.call(|reply| BrokerMessage::Enqueue {
            job_id,
            operation,
            reply,
        })
        .await?
    }

    /// Lease the oldest eligible job, waiting until one exists.
    ///
    /// `None` means the broker released its waiters and no more work will
    /// be handed out.
    pub async fn lease(&self, worker_id: &str) -> Result<Option<Job>, QueueError> {
        self.call(|reply| BrokerMessage::Lease {
            worker_id: worker_id.to_string(),
            wait: true,
            reply,
        })
        .await
    }

    /// Lease the oldest eligible job if there is one right now.
    pub async fn try_lease(&self, worker_id: &str) -> Result<Option<Job>, QueueError> {
        self.call(|reply| BrokerMessage::Lease {
            worker_id: worker_id.to_string(),
            wait: false,
            reply,
        })
        .await
    }

    /// Complete the job leased as `attempt`. Returns whether this call made
    /// the transition; a report from an expired lease changes nothing.
    pub async fn ack(
        &self,
        job_id: JobId,
        result: serde_json::Value,
        attempt: u32,
    ) -> Result<bool, QueueError> {
        self.call(|reply| BrokerMessage::Ack {
            job_id,
            attempt,
            result,
            reply,
        })
        .await?
    }

    /// Report a failed attempt and learn what the broker did with the job.
    pub async fn fail(
        &self,
        job_id: JobId,
        error: HandlerError,
        attempt: u32,
    ) -> Result<RequeueDecision, QueueError> {
        self.call(|reply| BrokerMessage::Fail {
            job_id,
            attempt,
            error,
            reply,
        })
        .await?
    }

    pub async fn get_status(&self, job_id: JobId) -> Result<Option<JobSnapshot>, QueueError> {
        self.call(|reply| BrokerMessage::GetStatus { job_id, reply })
            .await?
    }

    /// Answer all parked `lease` calls with `None` and stop leasing.
    pub fn release_waiters(&self) {
        let _ = self.actor.send_message(BrokerMessage::ReleaseWaiters);
    }

    pub fn shutdown(&self) {
        let _ = self.actor.send_message(BrokerMessage::Shutdown);
    }
}
