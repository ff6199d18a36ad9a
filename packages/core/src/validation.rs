//! Typed payload decoding and validation.

use serde::de::DeserializeOwned;

use crate::ValidationError;

/// Field-level checks run on a decoded payload before it is enqueued.
pub trait Validate {
    fn validate(&self, operation: &str) -> Result<(), ValidationError>;
}

/// Decode `payload` into `T` and validate it.
pub fn decode_payload<T>(operation: &str, payload: &serde_json::Value) -> Result<T, ValidationError>
where
    T: DeserializeOwned + Validate,
{
    let decoded: T = serde_json::from_value(payload.clone()).map_err(|e| {
        ValidationError::MalformedPayload {
            operation: operation.to_string(),
            message: e.to_string(),
        }
    })?;
    decoded.validate(operation)?;
    Ok(decoded)
}

/// Reject empty or whitespace-only strings.
pub fn require_non_empty(operation: &str, field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::field(operation, field, "must not be empty"));
    }
    Ok(())
}

/// Require an absolute http(s) URL.
pub fn require_http_url(operation: &str, field: &str, value: &str) -> Result<(), ValidationError> {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(()),
        _ => Err(ValidationError::field(
            operation,
            field,
            "must be an absolute http(s) URL",
        )),
    }
}
