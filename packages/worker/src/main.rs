//! Standalone job queue process: runs the broker and workers until Ctrl-C.

use api::{Runtime, RuntimeConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RuntimeConfig::from_env()?;
    let runtime = Runtime::start(config).await?;
    tracing::info!(
        workers = runtime.worker_count().await,
        "Waiting for jobs, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    runtime.shutdown().await;

    Ok(())
}
