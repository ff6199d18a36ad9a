//! Client for the external extraction and enrichment service.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use queue_core::HandlerError;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Where the extraction service should read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "url", rename_all = "snake_case")]
pub enum ExtractSource {
    /// A photo of ingredients or a recipe card.
    Image(String),
    /// A recipe web page.
    Page(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Ingredient {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quantity: None,
            unit: None,
        }
    }
}

/// Structured content pulled out of a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub instructions: Vec<String>,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Errors talking to the extraction service.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("network error: {0}")]
    Network(String),

    #[error("service error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    Decode(String),
}

impl CollaboratorError {
    /// Transport failures, 5xx and 429 are worth retrying; anything else
    /// will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            CollaboratorError::Network(_) => true,
            CollaboratorError::Status { status, .. } => *status >= 500 || *status == 429,
            CollaboratorError::Decode(_) => false,
        }
    }
}

impl From<CollaboratorError> for HandlerError {
    fn from(e: CollaboratorError) -> Self {
        if e.is_transient() {
            HandlerError::transient(e.to_string())
        } else {
            HandlerError::terminal(e.to_string())
        }
    }
}

/// Future returned by extraction calls.
pub type CallFuture<T> = BoxFuture<'static, Result<T, CollaboratorError>>;

/// The extraction service as seen by handlers.
pub trait ExtractionService: Send + Sync + 'static {
    /// Pull structured content out of an image or page.
    fn extract(&self, source: ExtractSource) -> CallFuture<Extraction>;

    /// Normalize and complete extracted content.
    fn enrich(&self, extraction: Extraction) -> CallFuture<Extraction>;

    /// Compute an embedding for similarity search.
    fn embed(&self, text: String) -> CallFuture<Vec<f32>>;
}

/// Extraction service connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090".to_string(),
            timeout_secs: REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ExtractionConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// HTTP implementation (`POST /extract`, `/enrich`, `/embed`).
#[derive(Clone)]
pub struct HttpExtractionClient {
    client: Client,
    base_url: Arc<str>,
}

impl HttpExtractionClient {
    pub fn new(config: &ExtractionConfig) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CollaboratorError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').into(),
        })
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, CollaboratorError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| CollaboratorError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| CollaboratorError::Decode(e.to_string()))
    }
}

impl ExtractionService for HttpExtractionClient {
    fn extract(&self, source: ExtractSource) -> CallFuture<Extraction> {
        let client = self.clone();
        Box::pin(async move { client.post("/extract", &source).await })
    }

    fn enrich(&self, extraction: Extraction) -> CallFuture<Extraction> {
        let client = self.clone();
        Box::pin(async move { client.post("/enrich", &extraction).await })
    }

    fn embed(&self, text: String) -> CallFuture<Vec<f32>> {
        let client = self.clone();
        Box::pin(async move {
            let response: EmbedResponse = client.post("/embed", &EmbedRequest { text: &text }).await?;
            Ok(response.embedding)
        })
    }
}

/// Trim and lowercase names, drop blanks and keep the first of duplicates.
pub fn normalize_ingredients(ingredients: Vec<Ingredient>) -> Vec<Ingredient> {
    let mut seen = std::collections::HashSet::new();
    ingredients
        .into_iter()
        .filter_map(|mut ingredient| {
            ingredient.name = ingredient.name.trim().to_lowercase();
            if ingredient.name.is_empty() || !seen.insert(ingredient.name.clone()) {
                return None;
            }
            Some(ingredient)
        })
        .collect()
}
