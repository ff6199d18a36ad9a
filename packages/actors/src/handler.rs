//! Job handler trait and registry.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use queue_core::{HandlerError, Job, Operation, Validate, ValidationError, decode_payload};
use serde::de::DeserializeOwned;

use crate::context::JobContext;

/// Result type for job handlers.
pub type HandlerResult = Result<serde_json::Value, HandlerError>;

/// Future type for async job handlers.
pub type HandlerFuture = BoxFuture<'static, HandlerResult>;

/// Trait for job handlers.
///
/// Implement this trait to define how jobs of a specific operation type are
/// validated at submission and processed by workers.
pub trait JobHandler: Send + Sync + 'static {
    /// The operation type this handler processes.
    fn operation_type(&self) -> &str;

    /// Check a payload before it is accepted.
    fn validate(&self, payload: &serde_json::Value) -> Result<(), ValidationError>;

    /// Process one attempt of a job.
    fn handle(&self, job: &Job, ctx: JobContext) -> HandlerFuture;
}

/// A handler whose payload decodes into a typed, self-validating struct.
///
/// Wrap it in [`Typed`] (or use [`JobHandlerRegistry::register_typed`]) to
/// get a [`JobHandler`].
pub trait TypedHandler: Send + Sync + 'static {
    const OPERATION: &'static str;

    type Payload: DeserializeOwned + Validate + Send + 'static;

    fn run(&self, payload: Self::Payload, ctx: JobContext) -> HandlerFuture;
}

/// Adapter from [`TypedHandler`] to [`JobHandler`].
pub struct Typed<H>(pub H);

impl<H: TypedHandler> JobHandler for Typed<H> {
    fn operation_type(&self) -> &str {
        H::OPERATION
    }

    fn validate(&self, payload: &serde_json::Value) -> Result<(), ValidationError> {
        decode_payload::<H::Payload>(H::OPERATION, payload).map(|_| ())
    }

    fn handle(&self, job: &Job, ctx: JobContext) -> HandlerFuture {
        match decode_payload::<H::Payload>(H::OPERATION, &job.operation.payload) {
            Ok(payload) => self.0.run(payload, ctx),
            // A stored payload that no longer decodes will not decode on retry either
            Err(e) => {
                let message = e.to_string();
                Box::pin(async move { Err(HandlerError::terminal(message)) })
            }
        }
    }
}

/// Registry for job handlers.
///
/// Maps operation types to their handlers for dynamic dispatch.
#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for an operation type.
    pub fn register<H: JobHandler>(&mut self, handler: H) {
        let operation_type = handler.operation_type().to_string();
        self.handlers.insert(operation_type, Arc::new(handler));
    }

    pub fn register_typed<H: TypedHandler>(&mut self, handler: H) {
        self.register(Typed(handler));
    }

    /// Get a handler for an operation type.
    pub fn get(&self, operation_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(operation_type).cloned()
    }

    /// List all registered operation types.
    pub fn operation_types(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }

    /// Reject unknown operation types and payloads their handler refuses.
    pub fn validate(&self, operation: &Operation) -> Result<(), ValidationError> {
        let handler = self
            .handlers
            .get(&operation.kind)
            .ok_or_else(|| ValidationError::UnknownOperation(operation.kind.clone()))?;
        handler.validate(&operation.payload)
    }
}

/// A simple function-based job handler that accepts any object payload.
pub struct FnHandler<F>
where
    F: Fn(&Job, JobContext) -> HandlerFuture + Send + Sync + 'static,
{
    operation_type: String,
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Job, JobContext) -> HandlerFuture + Send + Sync + 'static,
{
    /// Create a new function-based handler.
    pub fn new(operation_type: impl Into<String>, handler: F) -> Self {
        Self {
            operation_type: operation_type.into(),
            handler,
        }
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(&Job, JobContext) -> HandlerFuture + Send + Sync + 'static,
{
    fn operation_type(&self) -> &str {
        &self.operation_type
    }

    fn validate(&self, payload: &serde_json::Value) -> Result<(), ValidationError> {
        if payload.is_object() {
            Ok(())
        } else {
            Err(ValidationError::MalformedPayload {
                operation: self.operation_type.clone(),
                message: "payload must be a JSON object".into(),
            })
        }
    }

    fn handle(&self, job: &Job, ctx: JobContext) -> HandlerFuture {
        (self.handler)(job, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Echo {
        text: String,
    }

    impl Validate for Echo {
        fn validate(&self, operation: &str) -> Result<(), ValidationError> {
            queue_core::require_non_empty(operation, "text", &self.text)
        }
    }

    struct EchoHandler;

    impl TypedHandler for EchoHandler {
        const OPERATION: &'static str = "echo";
        type Payload = Echo;

        fn run(&self, payload: Echo, _ctx: JobContext) -> HandlerFuture {
            Box::pin(async move { Ok(json!({ "text": payload.text })) })
        }
    }

    fn registry() -> JobHandlerRegistry {
        let mut registry = JobHandlerRegistry::new();
        registry.register_typed(EchoHandler);
        registry.register(FnHandler::new("noop", |_job, _ctx| {
            Box::pin(async { Ok(serde_json::Value::Null) })
        }));
        registry
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let err = registry()
            .validate(&Operation::new("nope", json!({})))
            .unwrap_err();
        assert_eq!(err, ValidationError::UnknownOperation("nope".into()));
    }

    #[test]
    fn typed_payload_is_validated() {
        let registry = registry();
        assert!(registry.validate(&Operation::new("echo", json!({ "text": "hi" }))).is_ok());
        assert!(matches!(
            registry.validate(&Operation::new("echo", json!({ "text": "" }))),
            Err(ValidationError::InvalidField { .. })
        ));
        assert!(matches!(
            registry.validate(&Operation::new("echo", json!({ "other": 1 }))),
            Err(ValidationError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn fn_handler_requires_object_payload() {
        let registry = registry();
        assert!(registry.validate(&Operation::new("noop", json!({}))).is_ok());
        assert!(registry.validate(&Operation::new("noop", json!([1, 2]))).is_err());
        let mut types = registry.operation_types();
        types.sort();
        assert_eq!(types, ["echo", "noop"]);
    }
}
