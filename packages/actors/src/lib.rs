//! Actor system for the job queue.
//!
//! This crate provides the Ractor-based actors that dispatch and execute
//! jobs.
//!
//! # Architecture
//!
//! - `BrokerActor` - Owns dispatch state and serializes every job transition
//! - `PoolActor` - Keeps a fixed number of workers alive
//! - `WorkerActor` - Leases jobs one at a time and runs their handler
//!
//! # Usage
//!
//! ```ignore
//! use actors::{Broker, PoolArgs, WorkerPool};
//!
//! let (broker, _) = Broker::start(jobs.clone(), BrokerConfig::default()).await?;
//! let (pool, _) = WorkerPool::start(PoolArgs { concurrency: 4, broker, handlers, bus, store: jobs }).await?;
//! ```

mod broker;
mod context;
mod handler;
mod messages;
mod pool;
mod worker_actor;

pub use broker::{Broker, BrokerActor, BrokerArgs};
pub use context::JobContext;
pub use handler::{
    FnHandler, HandlerFuture, HandlerResult, JobHandler, JobHandlerRegistry, Typed, TypedHandler,
};
pub use messages::{BrokerMessage, PoolMessage, WorkerMessage};
pub use pool::{PoolActor, PoolArgs, WorkerPool};
pub use worker_actor::{WorkerActor, WorkerArgs};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
