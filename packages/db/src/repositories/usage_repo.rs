//! Usage accounting records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

/// One accounted unit of usage, written by a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub kind: String,
    pub quantity: u64,
    pub job_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// Repository for usage persistence operations.
#[derive(Clone)]
pub struct UsageRepository {
    db: Database,
}

impl UsageRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record usage for a job; a re-executed job overwrites its own record.
    pub async fn record(&self, usage: UsageRecord) -> Result<UsageRecord, DbError> {
        let key = format!("{}|{}", usage.job_id, usage.kind);

        let mut response = self
            .db
            .query("UPSERT type::thing('usage', $key) CONTENT $usage RETURN AFTER")
            .bind(("key", key.clone()))
            .bind(("usage", usage))
            .await?;

        let records: Vec<UsageRecord> = response.take(0)?;
        records
            .into_iter()
            .next()
            .ok_or_else(|| DbError::Query(format!("Failed to record usage: {}", key)))
    }

    /// Total quantity recorded for a user and kind.
    pub async fn total_for_user(&self, user_id: &str, kind: &str) -> Result<u64, DbError> {
        let mut response = self
            .db
            .query("SELECT quantity FROM usage WHERE user_id = $user_id AND kind = $kind")
            .bind(("user_id", user_id.to_string()))
            .bind(("kind", kind.to_string()))
            .await?;

        #[derive(Deserialize)]
        struct Quantity {
            quantity: u64,
        }

        let rows: Vec<Quantity> = response.take(0)?;
        Ok(rows.iter().map(|row| row.quantity).sum())
    }
}
