//! Repository implementations for database operations.

mod job_repo;
mod recipe_repo;
mod usage_repo;

pub use job_repo::JobRepository;
pub use recipe_repo::{RecipeRecord, RecipeRepository};
pub use usage_repo::{UsageRecord, UsageRepository};
