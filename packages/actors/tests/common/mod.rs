#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use actors::{Broker, JobHandlerRegistry, PoolArgs, WorkerPool};
use bus::PubSub;
use db::repositories::JobRepository;
use db::{DbConfig, DbError};
use queue_core::{BrokerConfig, JobId, JobSnapshot, RetryPolicy};
use tokio::task::JoinHandle;

pub async fn setup_store() -> Result<JobRepository, DbError> {
    let db = db::init(&DbConfig::memory()).await?;
    Ok(JobRepository::new(db))
}

/// Short delays so retry and expiry tests finish quickly.
pub fn fast_config(max_attempts: u32) -> BrokerConfig {
    BrokerConfig::default()
        .with_retry(RetryPolicy::new(
            max_attempts,
            Duration::from_millis(20),
            Duration::from_millis(80),
        ))
        .with_tick_interval(Duration::from_millis(10))
}

pub struct Harness {
    pub broker: Broker,
    pub pool: WorkerPool,
    pub bus: PubSub,
    pub store: JobRepository,
    broker_handle: JoinHandle<()>,
    pool_handle: JoinHandle<()>,
}

impl Harness {
    pub async fn start(handlers: JobHandlerRegistry, config: BrokerConfig, concurrency: usize) -> Self {
        let store = setup_store().await.expect("database");
        let bus = PubSub::new();
        let (broker, broker_handle) = Broker::start(store.clone(), config)
            .await
            .expect("broker");
        let (pool, pool_handle) = WorkerPool::start(PoolArgs {
            concurrency,
            broker: broker.clone(),
            handlers: Arc::new(handlers),
            bus: bus.clone(),
            store: store.clone(),
        })
        .await
        .expect("pool");

        Self {
            broker,
            pool,
            bus,
            store,
            broker_handle,
            pool_handle,
        }
    }

    pub async fn shutdown(self) {
        self.pool.drain().await.expect("drain");
        self.pool.stop();
        self.broker.shutdown();
        let _ = self.pool_handle.await;
        let _ = self.broker_handle.await;
    }
}

/// Poll until the job reaches a terminal status.
pub async fn wait_for_terminal(broker: &Broker, job_id: JobId) -> JobSnapshot {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(snapshot) = broker.get_status(job_id).await.expect("status")
                && snapshot.status.is_terminal()
            {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not finish in time")
}
