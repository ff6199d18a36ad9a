//! Worker actor for executing jobs.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bus::PubSub;
use chrono::Utc;
use db::repositories::JobRepository;
use futures_util::FutureExt;
use queue_core::{HandlerError, Job, LifecycleEvent, ProgressEvent, RequeueDecision};
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::broker::Broker;
use crate::context::JobContext;
use crate::handler::{HandlerResult, JobHandlerRegistry};
use crate::messages::WorkerMessage;

/// State for the worker actor.
pub struct WorkerActorState {
    /// Unique worker ID.
    pub worker_id: String,
    broker: Broker,
    handlers: Arc<JobHandlerRegistry>,
    bus: PubSub,
    store: JobRepository,
    /// Jobs this worker has finished, successfully or not.
    pub processed: u64,
}

/// Worker actor arguments.
#[derive(Clone)]
pub struct WorkerArgs {
    pub worker_id: String,
    pub broker: Broker,
    pub handlers: Arc<JobHandlerRegistry>,
    pub bus: PubSub,
    pub store: JobRepository,
}

impl WorkerActorState {
    async fn run_handler(&self, job: &Job, ctx: JobContext) -> HandlerResult {
        let Some(handler) = self.handlers.get(job.kind()) else {
            return Err(HandlerError::terminal(format!(
                "No handler for operation type: {}",
                job.kind()
            )));
        };

        AssertUnwindSafe(handler.handle(job, ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(HandlerError::transient("handler panicked")))
    }

    /// Run one attempt and report the outcome to the broker.
    ///
    /// Lifecycle events go out only after the broker accepted the outcome,
    /// so each job gets exactly one terminal event.
    async fn execute(&mut self, job: Job) {
        let job_id = job.id;
        let attempt = job.attempts;
        let ctx = JobContext::new(&job, &self.worker_id, self.bus.clone(), self.store.clone());

        tracing::info!(
            "Worker {} processing job {} ({}) attempt {}",
            self.worker_id,
            job_id,
            job.kind(),
            attempt
        );
        ctx.publish_lifecycle(&LifecycleEvent::Started {
            job_id,
            worker_id: self.worker_id.clone(),
            attempt,
            timestamp: Utc::now(),
        });

        match self.run_handler(&job, ctx.clone()).await {
            Ok(result) => {
                ctx.publish_progress(&ProgressEvent::new(job_id, attempt, "completed", 100));

                match self.broker.ack(job_id, result.clone(), attempt).await {
                    Ok(true) => ctx.publish_lifecycle(&LifecycleEvent::Completed {
                        job_id,
                        result,
                        attempts: attempt,
                        timestamp: Utc::now(),
                    }),
                    Ok(false) => tracing::debug!("Ack for job {} changed nothing", job_id),
                    Err(e) => tracing::warn!("Failed to ack job {}: {}", job_id, e),
                }
            }
            Err(error) => {
                let event = ctx
                    .progress_event("failed", ctx.progress())
                    .with_error(error.message());
                ctx.publish_progress(&event);

                match self.broker.fail(job_id, error.clone(), attempt).await {
                    Ok(RequeueDecision::Retry { delay, .. }) => {
                        ctx.publish_lifecycle(&LifecycleEvent::Retrying {
                            job_id,
                            attempt,
                            delay_ms: delay.as_millis() as u64,
                            error: error.message().to_string(),
                            timestamp: Utc::now(),
                        })
                    }
                    Ok(RequeueDecision::Terminal) => {
                        ctx.publish_lifecycle(&LifecycleEvent::Failed {
                            job_id,
                            reason: error.message().to_string(),
                            attempts: attempt,
                            timestamp: Utc::now(),
                        })
                    }
                    Ok(RequeueDecision::Discarded) => {
                        tracing::debug!("Failure report for job {} was stale", job_id)
                    }
                    Err(e) => tracing::warn!("Failed to report failure of job {}: {}", job_id, e),
                }
            }
        }

        self.processed += 1;
    }
}

/// Worker actor that leases and executes jobs one at a time.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);

        // Start the work loop
        myself.send_message(WorkerMessage::Poll)?;

        Ok(WorkerActorState {
            worker_id: args.worker_id,
            broker: args.broker,
            handlers: args.handlers,
            bus: args.bus,
            store: args.store,
            processed: 0,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => match state.broker.lease(&state.worker_id).await {
                Ok(Some(job)) => {
                    myself.send_message(WorkerMessage::ProcessJob { job: Box::new(job) })?;
                }
                Ok(None) => {
                    tracing::info!(
                        "Worker {} released after {} job(s)",
                        state.worker_id,
                        state.processed
                    );
                    myself.stop(None);
                }
                Err(e) => {
                    tracing::warn!("Worker {} lost the broker: {}", state.worker_id, e);
                    myself.stop(Some(e.to_string()));
                }
            },

            WorkerMessage::ProcessJob { job } => {
                state.execute(*job).await;
                myself.send_message(WorkerMessage::Poll)?;
            }
        }

        Ok(())
    }
}
