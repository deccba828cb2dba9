//! Backend handler capability contract
//!
//! Every backend target (remote server, mirror sink, no-op) implements
//! [`BackendHandler`]. A handler that has nothing to say about an operation
//! answers [`HandlerOutcome::NoOpinion`]; one that does not support a model or
//! operation answers [`HandlerOutcome::Unsupported`] (the default for every
//! operation, so implementors only override what they handle).

use async_trait::async_trait;

use crate::models::{AuthContext, Instance, MethodOptions, Operation};
use crate::Result;

/// Result of a single handler invocation
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// Created/updated/fetched representation of the instance
    Record(Instance),
    /// The handler ran but contributes no data
    NoOpinion,
    /// The handler does not implement this operation for this model
    Unsupported,
}

impl HandlerOutcome {
    /// The record, if it carries any information.
    pub fn into_record(self) -> Option<Instance> {
        match self {
            HandlerOutcome::Record(instance) if !instance.is_empty() => Some(instance),
            _ => None,
        }
    }

    pub fn is_record(&self) -> bool {
        matches!(self, HandlerOutcome::Record(instance) if !instance.is_empty())
    }

    pub fn label(&self) -> &'static str {
        match self {
            HandlerOutcome::Record(instance) if !instance.is_empty() => "record",
            HandlerOutcome::Record(_) | HandlerOutcome::NoOpinion => "no-opinion",
            HandlerOutcome::Unsupported => "unsupported",
        }
    }
}

impl From<Option<Instance>> for HandlerOutcome {
    fn from(value: Option<Instance>) -> Self {
        match value {
            Some(instance) => HandlerOutcome::Record(instance),
            None => HandlerOutcome::NoOpinion,
        }
    }
}

/// Capability contract for backend targets
#[async_trait]
pub trait BackendHandler: Send + Sync {
    /// Short name used in logs and dispatch reports (e.g. "remote")
    fn name(&self) -> &str;

    /// Whether this handler implements `operation` for `model`.
    ///
    /// Consulted before invocation; handlers that return `false` are skipped.
    fn supports(&self, _model: &str, _operation: Operation) -> bool {
        true
    }

    async fn create(
        &self,
        _instance: &Instance,
        _auth: Option<&AuthContext>,
        _options: &MethodOptions,
    ) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Unsupported)
    }

    async fn read(
        &self,
        _instance: &Instance,
        _auth: Option<&AuthContext>,
        _options: &MethodOptions,
    ) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Unsupported)
    }

    async fn update(
        &self,
        _instance: &Instance,
        _auth: Option<&AuthContext>,
        _options: &MethodOptions,
    ) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Unsupported)
    }

    async fn delete(
        &self,
        _instance: &Instance,
        _auth: Option<&AuthContext>,
        _options: &MethodOptions,
    ) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Unsupported)
    }

    /// Route to the method matching `operation`.
    async fn invoke(
        &self,
        operation: Operation,
        instance: &Instance,
        auth: Option<&AuthContext>,
        options: &MethodOptions,
    ) -> Result<HandlerOutcome> {
        match operation {
            Operation::Create => self.create(instance, auth, options).await,
            Operation::Read => self.read(instance, auth, options).await,
            Operation::Update => self.update(instance, auth, options).await,
            Operation::Delete => self.delete(instance, auth, options).await,
        }
    }
}

/// Null handler: supports everything, never fails, never contributes data.
///
/// Unresolvable targets degrade to this handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

#[async_trait]
impl BackendHandler for NoopHandler {
    fn name(&self) -> &str {
        "noop"
    }

    async fn create(
        &self,
        _instance: &Instance,
        _auth: Option<&AuthContext>,
        _options: &MethodOptions,
    ) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::NoOpinion)
    }

    async fn read(
        &self,
        _instance: &Instance,
        _auth: Option<&AuthContext>,
        _options: &MethodOptions,
    ) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::NoOpinion)
    }

    async fn update(
        &self,
        _instance: &Instance,
        _auth: Option<&AuthContext>,
        _options: &MethodOptions,
    ) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::NoOpinion)
    }

    async fn delete(
        &self,
        _instance: &Instance,
        _auth: Option<&AuthContext>,
        _options: &MethodOptions,
    ) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::NoOpinion)
    }
}

/// Mirror sink that records each notification in the log.
#[derive(Debug, Clone)]
pub struct LogHandler {
    label: String,
}

impl LogHandler {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    fn record(&self, operation: Operation, instance: &Instance, auth: Option<&AuthContext>) {
        tracing::info!(
            sink = %self.label,
            operation = %operation,
            model = %instance.model,
            uuid = instance.uuid.as_deref().unwrap_or("-"),
            principal = auth.and_then(|a| a.principal()).unwrap_or("-"),
            "Backend notification"
        );
    }
}

impl Default for LogHandler {
    fn default() -> Self {
        Self::new("log")
    }
}

#[async_trait]
impl BackendHandler for LogHandler {
    fn name(&self) -> &str {
        &self.label
    }

    async fn create(
        &self,
        instance: &Instance,
        auth: Option<&AuthContext>,
        _options: &MethodOptions,
    ) -> Result<HandlerOutcome> {
        self.record(Operation::Create, instance, auth);
        Ok(HandlerOutcome::NoOpinion)
    }

    async fn read(
        &self,
        instance: &Instance,
        auth: Option<&AuthContext>,
        _options: &MethodOptions,
    ) -> Result<HandlerOutcome> {
        self.record(Operation::Read, instance, auth);
        Ok(HandlerOutcome::NoOpinion)
    }

    async fn update(
        &self,
        instance: &Instance,
        auth: Option<&AuthContext>,
        _options: &MethodOptions,
    ) -> Result<HandlerOutcome> {
        self.record(Operation::Update, instance, auth);
        Ok(HandlerOutcome::NoOpinion)
    }

    async fn delete(
        &self,
        instance: &Instance,
        auth: Option<&AuthContext>,
        _options: &MethodOptions,
    ) -> Result<HandlerOutcome> {
        self.record(Operation::Delete, instance, auth);
        Ok(HandlerOutcome::NoOpinion)
    }
}
