#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use api::{JobId, JobService, JobSnapshot, Runtime, RuntimeConfig};
use handlers::extraction::CallFuture;
use handlers::{ExtractSource, Extraction, ExtractionService, Ingredient};
use queue_core::{BrokerConfig, RetryPolicy};

/// Extraction service that always finds the same ingredients.
pub struct StaticExtraction {
    pub ingredients: Vec<&'static str>,
    /// How long each extraction takes.
    pub delay: Duration,
}

impl ExtractionService for StaticExtraction {
    fn extract(&self, _source: ExtractSource) -> CallFuture<Extraction> {
        let extraction = Extraction {
            title: Some("Fridge".to_string()),
            ingredients: self.ingredients.iter().map(|n| Ingredient::named(*n)).collect(),
            instructions: Vec::new(),
        };
        let delay = self.delay;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(extraction)
        })
    }

    fn enrich(&self, extraction: Extraction) -> CallFuture<Extraction> {
        Box::pin(async move { Ok(extraction) })
    }

    fn embed(&self, _text: String) -> CallFuture<Vec<f32>> {
        Box::pin(async move { Ok(vec![0.5, 0.5]) })
    }
}

pub fn test_config(concurrency: usize) -> RuntimeConfig {
    RuntimeConfig {
        concurrency,
        broker: BrokerConfig::default()
            .with_retry(RetryPolicy::new(
                2,
                Duration::from_millis(20),
                Duration::from_millis(40),
            ))
            .with_tick_interval(Duration::from_millis(10)),
        ..RuntimeConfig::default()
    }
}

pub async fn start_runtime(concurrency: usize) -> Runtime {
    start_slow_runtime(concurrency, Duration::ZERO).await
}

pub async fn start_slow_runtime(concurrency: usize, delay: Duration) -> Runtime {
    let extraction = Arc::new(StaticExtraction {
        ingredients: vec!["Eggs", "Butter"],
        delay,
    });
    Runtime::start_with(test_config(concurrency), extraction)
        .await
        .expect("runtime")
}

/// Poll until the job reaches a terminal status.
pub async fn wait_for_terminal(service: &JobService, job_id: JobId) -> JobSnapshot {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let snapshot = service.get_job(job_id).await.expect("status");
            if snapshot.status.is_terminal() {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not finish in time")
}
