//! Recipe repository used by import jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

/// A recipe produced by an import job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeRecord {
    pub key: String,
    pub user_id: String,
    pub source_url: String,
    pub title: String,
    pub ingredients: Vec<String>,
    pub instructions: Vec<String>,
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub job_id: String,
    pub updated_at: DateTime<Utc>,
}

/// Repository for recipe persistence operations.
#[derive(Clone)]
pub struct RecipeRepository {
    db: Database,
}

impl RecipeRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Natural key of a recipe: one per user and source.
    pub fn natural_key(user_id: &str, source_url: &str) -> String {
        format!("{}|{}", user_id, source_url)
    }

    /// Insert or replace the recipe stored under its natural key.
    pub async fn upsert(&self, recipe: RecipeRecord) -> Result<RecipeRecord, DbError> {
        let key = recipe.key.clone();

        let mut response = self
            .db
            .query("UPSERT type::thing('recipe', $key) CONTENT $recipe RETURN AFTER")
            .bind(("key", key.clone()))
            .bind(("recipe", recipe))
            .await?;

        let records: Vec<RecipeRecord> = response.take(0)?;
        records
            .into_iter()
            .next()
            .ok_or_else(|| DbError::Query(format!("Failed to upsert recipe: {}", key)))
    }

    /// Get a recipe by natural key.
    pub async fn get(&self, key: &str) -> Result<Option<RecipeRecord>, DbError> {
        let record: Option<RecipeRecord> = self.db.select(("recipe", key.to_string())).await?;
        Ok(record)
    }

    /// All recipes of one user.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<RecipeRecord>, DbError> {
        let mut response = self
            .db
            .query("SELECT * FROM recipe WHERE user_id = $user_id")
            .bind(("user_id", user_id.to_string()))
            .await?;

        let records: Vec<RecipeRecord> = response.take(0)?;
        Ok(records)
    }
}
