//! Operation handlers for the job queue.
//!
//! Each handler decodes and validates its payload, then works through named
//! stages, reporting progress through its [`actors::JobContext`]. Side
//! effects are upserts keyed by something stable, so a retried attempt
//! overwrites rather than duplicates.

pub mod extraction;
mod ingredient_parse;
mod recipe_import;
mod usage_record;

use std::sync::Arc;

use actors::JobHandlerRegistry;
use db::Database;
use db::repositories::{RecipeRepository, UsageRepository};

pub use extraction::{
    CollaboratorError, ExtractSource, Extraction, ExtractionConfig, ExtractionService,
    HttpExtractionClient, Ingredient,
};
pub use ingredient_parse::{IngredientParseHandler, IngredientParsePayload, SCAN_USAGE_KIND};
pub use recipe_import::{RecipeImportHandler, RecipeImportPayload};
pub use usage_record::{UsageRecordHandler, UsageRecordPayload};

/// Everything the handlers call out to.
#[derive(Clone)]
pub struct Collaborators {
    pub extraction: Arc<dyn ExtractionService>,
    pub recipes: RecipeRepository,
    pub usage: UsageRepository,
}

impl Collaborators {
    pub fn new(extraction: Arc<dyn ExtractionService>, db: &Database) -> Self {
        Self {
            extraction,
            recipes: RecipeRepository::new(db.clone()),
            usage: UsageRepository::new(db.clone()),
        }
    }
}

/// A registry with every built-in operation type.
pub fn registry(collaborators: &Collaborators) -> JobHandlerRegistry {
    let mut registry = JobHandlerRegistry::new();
    registry.register_typed(IngredientParseHandler::new(
        collaborators.extraction.clone(),
        collaborators.usage.clone(),
    ));
    registry.register_typed(RecipeImportHandler::new(
        collaborators.extraction.clone(),
        collaborators.recipes.clone(),
    ));
    registry.register_typed(UsageRecordHandler::new(collaborators.usage.clone()));
    registry
}
