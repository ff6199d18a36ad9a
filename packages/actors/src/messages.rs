//! Message types for actor communication.

use queue_core::{HandlerError, Job, JobId, JobSnapshot, Operation, QueueError, RequeueDecision};
use ractor::RpcReplyPort;

/// Messages for the broker actor.
#[derive(Debug)]
pub enum BrokerMessage {
    /// Record a new pending job.
    Enqueue {
        job_id: JobId,
        operation: Operation,
        reply: RpcReplyPort<Result<JobSnapshot, QueueError>>,
    },

    /// Lease the oldest eligible job.
    ///
    /// With `wait` the reply is parked until a job becomes eligible or the
    /// broker releases its waiters; without it the reply is immediate.
    Lease {
        worker_id: String,
        wait: bool,
        reply: RpcReplyPort<Option<Job>>,
    },

    /// Report successful completion. Replies whether this call completed
    /// the job (false for an idempotent repeat or a stale lease).
    Ack {
        job_id: JobId,
        attempt: u32,
        result: serde_json::Value,
        reply: RpcReplyPort<Result<bool, QueueError>>,
    },

    /// Report a failed attempt.
    Fail {
        job_id: JobId,
        attempt: u32,
        error: HandlerError,
        reply: RpcReplyPort<Result<RequeueDecision, QueueError>>,
    },

    /// Read the stored snapshot of a job.
    GetStatus {
        job_id: JobId,
        reply: RpcReplyPort<Result<Option<JobSnapshot>, QueueError>>,
    },

    /// Answer every parked lease request with `None` and refuse further
    /// leases.
    ReleaseWaiters,

    /// Release waiters and stop the broker.
    Shutdown,

    /// Periodic tick for lease expiry and delayed retries.
    Tick,
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Lease the next job, waiting until one is available.
    Poll,

    /// Execute a leased job, then poll again.
    ProcessJob { job: Box<Job> },
}

/// Messages for the worker pool.
#[derive(Debug)]
pub enum PoolMessage {
    /// Number of live workers.
    WorkerCount { reply: RpcReplyPort<usize> },

    /// Stop every worker after its current job and wait for them to exit.
    Drain { reply: RpcReplyPort<()> },
}
