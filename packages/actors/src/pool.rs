//! Worker pool actor: owns and supervises the workers.

use std::collections::HashMap;
use std::sync::Arc;

use bus::PubSub;
use db::repositories::JobRepository;
use queue_core::QueueError;
use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, SpawnErr, SupervisionEvent};
use tokio::task::JoinHandle;

use crate::broker::Broker;
use crate::handler::JobHandlerRegistry;
use crate::messages::{PoolMessage, WorkerMessage};
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// Worker pool arguments.
pub struct PoolArgs {
    /// Number of workers kept running.
    pub concurrency: usize,
    pub broker: Broker,
    pub handlers: Arc<JobHandlerRegistry>,
    pub bus: PubSub,
    pub store: JobRepository,
}

struct WorkerEntry {
    worker_id: String,
    actor: ActorRef<WorkerMessage>,
    handle: JoinHandle<()>,
}

/// State for the pool actor.
pub struct PoolState {
    args: PoolArgs,
    workers: HashMap<ActorId, WorkerEntry>,
    /// Worker counter for unique IDs.
    worker_counter: u64,
    /// Set once draining starts; exited workers are no longer replaced.
    draining: bool,
}

impl PoolState {
    /// Generate a unique worker ID.
    fn next_worker_id(&mut self) -> String {
        self.worker_counter += 1;
        format!("worker-{}", self.worker_counter)
    }
}

async fn spawn_worker(
    myself: &ActorRef<PoolMessage>,
    state: &mut PoolState,
) -> Result<(), ActorProcessingErr> {
    let args = WorkerArgs {
        worker_id: state.next_worker_id(),
        broker: state.args.broker.clone(),
        handlers: state.args.handlers.clone(),
        bus: state.args.bus.clone(),
        store: state.args.store.clone(),
    };
    let worker_id = args.worker_id.clone();

    let (actor, handle) = Actor::spawn_linked(None, WorkerActor, args, myself.get_cell())
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;

    state.workers.insert(
        actor.get_id(),
        WorkerEntry {
            worker_id,
            actor,
            handle,
        },
    );
    Ok(())
}

/// Pool actor that keeps a fixed number of workers alive.
pub struct PoolActor;

impl Actor for PoolActor {
    type Msg = PoolMessage;
    type State = PoolState;
    type Arguments = PoolArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker pool with {} worker(s)", args.concurrency);
        Ok(PoolState {
            args,
            workers: HashMap::new(),
            worker_counter: 0,
            draining: false,
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for _ in 0..state.args.concurrency {
            spawn_worker(&myself, state).await?;
        }
        Ok(())
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            PoolMessage::WorkerCount { reply } => {
                let _ = reply.send(state.workers.len());
            }

            PoolMessage::Drain { reply } => {
                tracing::info!("Draining {} worker(s)", state.workers.len());
                state.draining = true;
                let workers: Vec<WorkerEntry> = state.workers.drain().map(|(_, w)| w).collect();

                // Busy workers stop after their current job; idle ones are
                // parked in the broker until it lets them go.
                for worker in &workers {
                    worker.actor.stop(None);
                }
                state.args.broker.release_waiters();

                for worker in workers {
                    if let Err(e) = worker.handle.await {
                        tracing::warn!("Worker {} did not exit cleanly: {}", worker.worker_id, e);
                    }
                }

                let _ = reply.send(());
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorFailed(cell, error) => {
                let Some(worker) = state.workers.remove(&cell.get_id()) else {
                    return Ok(());
                };
                tracing::error!("Worker {} failed: {}", worker.worker_id, error);
                if !state.draining {
                    spawn_worker(&myself, state).await?;
                }
            }
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                if let Some(worker) = state.workers.remove(&cell.get_id()) {
                    tracing::info!("Worker {} stopped: {:?}", worker.worker_id, reason);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Cloneable handle to the worker pool.
#[derive(Clone)]
pub struct WorkerPool {
    actor: ActorRef<PoolMessage>,
}

impl WorkerPool {
    /// Spawn the pool and its workers.
    pub async fn start(args: PoolArgs) -> Result<(Self, JoinHandle<()>), SpawnErr> {
        let (actor, handle) = Actor::spawn(None, PoolActor, args).await?;
        Ok((Self { actor }, handle))
    }

    pub async fn worker_count(&self) -> Result<usize, QueueError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(PoolMessage::WorkerCount { reply: tx.into() })
            .map_err(|e| QueueError::Unavailable(format!("{}", e)))?;
        rx.await
            .map_err(|_| QueueError::Unavailable("worker pool stopped".into()))
    }

    /// Stop all workers once their current job is done and wait for them.
    pub async fn drain(&self) -> Result<(), QueueError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(PoolMessage::Drain { reply: tx.into() })
            .map_err(|e| QueueError::Unavailable(format!("{}", e)))?;
        rx.await
            .map_err(|_| QueueError::Unavailable("worker pool stopped".into()))
    }

    pub fn stop(&self) {
        self.actor.stop(None);
    }
}
