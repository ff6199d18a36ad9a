//! `usage.record`: account usage for a user.

use actors::{HandlerFuture, JobContext, TypedHandler};
use chrono::Utc;
use db::repositories::{UsageRecord, UsageRepository};
use queue_core::{HandlerError, Topic, UsageEvent, Validate, ValidationError, require_non_empty};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecordPayload {
    pub user_id: String,
    pub kind: String,
    pub quantity: u64,
}

impl Validate for UsageRecordPayload {
    fn validate(&self, operation: &str) -> Result<(), ValidationError> {
        require_non_empty(operation, "userId", &self.user_id)?;
        require_non_empty(operation, "kind", &self.kind)?;
        if self.quantity == 0 {
            return Err(ValidationError::field(operation, "quantity", "must be positive"));
        }
        Ok(())
    }
}

/// Upsert the job's usage record, then publish the new running total on the
/// user's usage topic.
pub(crate) async fn record_usage(
    ctx: &JobContext,
    usage: &UsageRepository,
    user_id: &str,
    kind: &str,
    quantity: u64,
) -> Result<u64, HandlerError> {
    let storage = |e: db::DbError| HandlerError::transient(format!("usage storage: {}", e));

    usage
        .record(UsageRecord {
            user_id: user_id.to_string(),
            kind: kind.to_string(),
            quantity,
            job_id: ctx.job_id().to_string(),
            recorded_at: Utc::now(),
        })
        .await
        .map_err(storage)?;
    let total = usage.total_for_user(user_id, kind).await.map_err(storage)?;

    ctx.publish(
        &Topic::usage(user_id),
        &UsageEvent {
            user_id: user_id.to_string(),
            kind: kind.to_string(),
            quantity,
            total,
            job_id: ctx.job_id(),
            timestamp: Utc::now(),
        },
    );
    Ok(total)
}

pub struct UsageRecordHandler {
    usage: UsageRepository,
}

impl UsageRecordHandler {
    pub fn new(usage: UsageRepository) -> Self {
        Self { usage }
    }
}

impl TypedHandler for UsageRecordHandler {
    const OPERATION: &'static str = "usage.record";
    type Payload = UsageRecordPayload;

    fn run(&self, payload: UsageRecordPayload, ctx: JobContext) -> HandlerFuture {
        let usage = self.usage.clone();
        Box::pin(async move {
            let total = record_usage(
                &ctx,
                &usage,
                &payload.user_id,
                &payload.kind,
                payload.quantity,
            )
            .await?;
            ctx.advance("recording", 90).await?;

            Ok(json!({
                "userId": payload.user_id,
                "kind": payload.kind,
                "total": total,
            }))
        })
    }
}
