//! `ingredient.parse`: read an ingredient list from a photo.

use std::sync::Arc;

use actors::{HandlerFuture, JobContext, TypedHandler};
use db::repositories::UsageRepository;
use queue_core::{Validate, ValidationError, require_http_url, require_non_empty};
use serde::Deserialize;
use serde_json::json;

use crate::extraction::{ExtractSource, ExtractionService, normalize_ingredients};
use crate::usage_record::record_usage;

/// Usage kind charged for one scan.
pub const SCAN_USAGE_KIND: &str = "ingredient_scan";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngredientParsePayload {
    pub image_url: String,
    pub user_id: String,
}

impl Validate for IngredientParsePayload {
    fn validate(&self, operation: &str) -> Result<(), ValidationError> {
        require_http_url(operation, "imageUrl", &self.image_url)?;
        require_non_empty(operation, "userId", &self.user_id)
    }
}

pub struct IngredientParseHandler {
    extraction: Arc<dyn ExtractionService>,
    usage: UsageRepository,
}

impl IngredientParseHandler {
    pub fn new(extraction: Arc<dyn ExtractionService>, usage: UsageRepository) -> Self {
        Self { extraction, usage }
    }
}

impl TypedHandler for IngredientParseHandler {
    const OPERATION: &'static str = "ingredient.parse";
    type Payload = IngredientParsePayload;

    fn run(&self, payload: IngredientParsePayload, ctx: JobContext) -> HandlerFuture {
        let extraction = self.extraction.clone();
        let usage = self.usage.clone();

        Box::pin(async move {
            let raw = extraction
                .extract(ExtractSource::Image(payload.image_url))
                .await?;
            ctx.advance_with(
                "extracting",
                30,
                format!("{} candidate(s)", raw.ingredients.len()),
            )
            .await?;

            let enriched = extraction.enrich(raw).await?;
            let ingredients = normalize_ingredients(enriched.ingredients);
            ctx.advance("enriching", 60).await?;

            record_usage(&ctx, &usage, &payload.user_id, SCAN_USAGE_KIND, 1).await?;
            ctx.advance("recording", 90).await?;

            Ok(json!({
                "count": ingredients.len(),
                "ingredients": ingredients,
            }))
        })
    }
}
