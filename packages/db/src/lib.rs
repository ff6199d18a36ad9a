//! SurrealDB integration for the job queue system.
//!
//! This crate provides database connectivity and repositories for
//! persisting jobs and the records handlers write.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, connect};
pub use schema::init_schema;

/// Connect and initialize the schema.
///
/// The returned handle is passed explicitly to every repository.
pub async fn init(config: &DbConfig) -> Result<Database, DbError> {
    let db = connect(config).await?;
    init_schema(&db).await?;
    Ok(db)
}
