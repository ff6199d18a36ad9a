//! `recipe.import`: turn a recipe page into a stored, searchable recipe.

use std::sync::Arc;

use actors::{HandlerFuture, JobContext, TypedHandler};
use chrono::Utc;
use db::repositories::{RecipeRecord, RecipeRepository};
use queue_core::{HandlerError, Validate, ValidationError, require_http_url, require_non_empty};
use serde::Deserialize;
use serde_json::json;

use crate::extraction::{ExtractSource, ExtractionService, normalize_ingredients};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeImportPayload {
    pub source_url: String,
    pub user_id: String,
}

impl Validate for RecipeImportPayload {
    fn validate(&self, operation: &str) -> Result<(), ValidationError> {
        require_http_url(operation, "sourceUrl", &self.source_url)?;
        require_non_empty(operation, "userId", &self.user_id)
    }
}

pub struct RecipeImportHandler {
    extraction: Arc<dyn ExtractionService>,
    recipes: RecipeRepository,
}

impl RecipeImportHandler {
    pub fn new(extraction: Arc<dyn ExtractionService>, recipes: RecipeRepository) -> Self {
        Self {
            extraction,
            recipes,
        }
    }
}

impl TypedHandler for RecipeImportHandler {
    const OPERATION: &'static str = "recipe.import";
    type Payload = RecipeImportPayload;

    fn run(&self, payload: RecipeImportPayload, ctx: JobContext) -> HandlerFuture {
        let extraction = self.extraction.clone();
        let recipes = self.recipes.clone();

        Box::pin(async move {
            let raw = extraction
                .extract(ExtractSource::Page(payload.source_url.clone()))
                .await?;
            ctx.advance("extracting", 25).await?;

            let enriched = extraction.enrich(raw).await?;
            let ingredients: Vec<String> = normalize_ingredients(enriched.ingredients)
                .into_iter()
                .map(|ingredient| ingredient.name)
                .collect();
            if ingredients.is_empty() {
                return Err(HandlerError::terminal("no ingredients found on the page"));
            }
            let title = enriched
                .title
                .filter(|title| !title.trim().is_empty())
                .unwrap_or_else(|| payload.source_url.clone());
            ctx.advance("enriching", 50).await?;

            let embedding = extraction
                .embed(format!("{}\n{}", title, ingredients.join(", ")))
                .await?;
            ctx.advance("embedding", 75).await?;

            let key = RecipeRepository::natural_key(&payload.user_id, &payload.source_url);
            let ingredient_count = ingredients.len();
            recipes
                .upsert(RecipeRecord {
                    key: key.clone(),
                    user_id: payload.user_id,
                    source_url: payload.source_url,
                    title: title.clone(),
                    ingredients,
                    instructions: enriched.instructions,
                    embedding,
                    job_id: ctx.job_id().to_string(),
                    updated_at: Utc::now(),
                })
                .await
                .map_err(|e| HandlerError::transient(format!("recipe storage: {}", e)))?;
            ctx.advance("storing", 90).await?;

            Ok(json!({
                "recipeKey": key,
                "title": title,
                "ingredientCount": ingredient_count,
            }))
        })
    }
}
