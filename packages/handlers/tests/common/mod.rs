#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use actors::{Broker, JobContext};
use bus::PubSub;
use db::repositories::JobRepository;
use db::{Database, DbConfig};
use handlers::extraction::CallFuture;
use handlers::{
    CollaboratorError, Collaborators, ExtractSource, Extraction, ExtractionService, Ingredient,
};
use queue_core::{BrokerConfig, Job, JobId, Operation};

/// Canned extraction service that records what it was asked.
#[derive(Default)]
pub struct FakeExtraction {
    pub extraction: Extraction,
    pub embedding: Vec<f32>,
    /// Errors returned by the next calls, in order.
    pub failures: Mutex<VecDeque<CollaboratorError>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeExtraction {
    pub fn with_ingredients(title: &str, names: &[&str]) -> Self {
        Self {
            extraction: Extraction {
                title: Some(title.to_string()),
                ingredients: names.iter().map(|n| Ingredient::named(*n)).collect(),
                instructions: vec!["Mix".to_string(), "Bake".to_string()],
            },
            embedding: vec![0.1, 0.2, 0.3],
            ..Default::default()
        }
    }

    pub fn fail_next(&self, error: CollaboratorError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn call(&self, name: &str) -> Result<(), CollaboratorError> {
        self.calls.lock().unwrap().push(name.to_string());
        match self.failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl ExtractionService for FakeExtraction {
    fn extract(&self, _source: ExtractSource) -> CallFuture<Extraction> {
        let result = self.call("extract").map(|_| self.extraction.clone());
        Box::pin(async move { result })
    }

    fn enrich(&self, extraction: Extraction) -> CallFuture<Extraction> {
        let result = self.call("enrich").map(|_| extraction);
        Box::pin(async move { result })
    }

    fn embed(&self, _text: String) -> CallFuture<Vec<f32>> {
        let result = self.call("embed").map(|_| self.embedding.clone());
        Box::pin(async move { result })
    }
}

pub struct Fixture {
    pub db: Database,
    pub store: JobRepository,
    pub broker: Broker,
    pub bus: PubSub,
    pub fake: Arc<FakeExtraction>,
    pub collaborators: Collaborators,
}

impl Fixture {
    pub async fn new(fake: FakeExtraction) -> Self {
        let db = db::init(&DbConfig::memory()).await.expect("database");
        let store = JobRepository::new(db.clone());
        let (broker, _) = Broker::start(store.clone(), BrokerConfig::default())
            .await
            .expect("broker");
        let fake = Arc::new(fake);
        let collaborators = Collaborators::new(fake.clone(), &db);

        Self {
            db,
            store,
            broker,
            bus: PubSub::new(),
            fake,
            collaborators,
        }
    }

    /// Enqueue and lease a job so handlers run against a real active attempt.
    pub async fn lease(&self, operation: Operation) -> (Job, JobContext) {
        self.broker
            .enqueue(operation, JobId::new())
            .await
            .expect("enqueue");
        let job = self
            .broker
            .try_lease("test-worker")
            .await
            .expect("lease")
            .expect("a job");
        let ctx = JobContext::new(&job, "test-worker", self.bus.clone(), self.store.clone());
        (job, ctx)
    }
}
