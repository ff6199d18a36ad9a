use db::{Database, DbConfig, DbError};

/// A fresh in-memory database with the schema applied.
///
/// Every call opens its own datastore, so tests never share state.
pub async fn setup_db() -> Result<Database, DbError> {
    db::init(&DbConfig::memory()).await
}
