//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables and indexes. Safe to run on every start.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    // Job table
    db.query(JOB_SCHEMA).await?.check()?;

    // Collaborator records written by handlers
    db.query(RECIPE_SCHEMA).await?.check()?;
    db.query(USAGE_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
///
/// Payload and result are kept as JSON text so arbitrary handler output
/// round-trips unchanged.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

DEFINE INDEX IF NOT EXISTS job_id ON job FIELDS job_id UNIQUE;
DEFINE INDEX IF NOT EXISTS job_status ON job FIELDS status;
DEFINE INDEX IF NOT EXISTS job_kind ON job FIELDS kind;
"#;

/// Recipes stored by import jobs, keyed by (user, source).
const RECIPE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS recipe SCHEMALESS;

DEFINE INDEX IF NOT EXISTS recipe_user ON recipe FIELDS user_id;
"#;

/// Usage records, keyed by (job, kind) so re-executed jobs overwrite.
const USAGE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS usage SCHEMALESS;

DEFINE INDEX IF NOT EXISTS usage_user_kind ON usage FIELDS user_id, kind;
"#;
