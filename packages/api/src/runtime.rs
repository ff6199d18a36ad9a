//! Wiring: database, bus, broker, worker pool and handlers.

use std::sync::Arc;

use actors::{Broker, PoolArgs, WorkerPool};
use bus::PubSub;
use db::repositories::JobRepository;
use db::DbError;
use handlers::{Collaborators, CollaboratorError, ExtractionService, HttpExtractionClient};
use tokio::task::JoinHandle;

use crate::config::{ConfigError, RuntimeConfig};
use crate::service::JobService;

/// Startup errors.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Extraction client error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Failed to spawn {0}")]
    Spawn(String),
}

/// A running job queue.
pub struct Runtime {
    service: JobService,
    broker: Broker,
    pool: WorkerPool,
    broker_handle: JoinHandle<()>,
    pool_handle: JoinHandle<()>,
}

impl Runtime {
    /// Start with the HTTP extraction client from `config`.
    pub async fn start(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let extraction = HttpExtractionClient::new(&config.extraction)?;
        Self::start_with(config, Arc::new(extraction)).await
    }

    /// Start with a caller-supplied extraction service.
    pub async fn start_with(
        config: RuntimeConfig,
        extraction: Arc<dyn ExtractionService>,
    ) -> Result<Self, RuntimeError> {
        tracing::info!(
            endpoint = %config.db.endpoint,
            concurrency = config.concurrency,
            "Starting job queue"
        );

        let database = db::init(&config.db).await?;
        let store = JobRepository::new(database.clone());
        let bus = PubSub::new();

        let collaborators = Collaborators::new(extraction, &database);
        let handlers = Arc::new(handlers::registry(&collaborators));

        let (broker, broker_handle) = Broker::start(store.clone(), config.broker.clone())
            .await
            .map_err(|e| RuntimeError::Spawn(format!("broker: {}", e)))?;

        let pool_args = PoolArgs {
            concurrency: config.concurrency,
            broker: broker.clone(),
            handlers: handlers.clone(),
            bus: bus.clone(),
            store: store.clone(),
        };
        let (pool, pool_handle) = match WorkerPool::start(pool_args).await {
            Ok(started) => started,
            Err(e) => {
                broker.shutdown();
                return Err(RuntimeError::Spawn(format!("worker pool: {}", e)));
            }
        };

        let service = JobService::new(broker.clone(), handlers, bus, store);

        tracing::info!(
            operations = ?service.operation_types(),
            "Job queue started"
        );

        Ok(Self {
            service,
            broker,
            pool,
            broker_handle,
            pool_handle,
        })
    }

    pub fn service(&self) -> &JobService {
        &self.service
    }

    pub async fn worker_count(&self) -> usize {
        self.pool.worker_count().await.unwrap_or(0)
    }

    /// Let in-flight jobs finish, then stop everything.
    ///
    /// Pending jobs stay in the store and are picked up on the next start.
    pub async fn shutdown(self) {
        tracing::info!("Draining workers");
        if let Err(e) = self.pool.drain().await {
            tracing::warn!(error = %e, "Drain did not complete cleanly");
        }

        self.pool.stop();
        let _ = self.pool_handle.await;

        self.broker.shutdown();
        let _ = self.broker_handle.await;
        tracing::info!("Job queue stopped");
    }
}
