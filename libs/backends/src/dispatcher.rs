//! Sequential fan-out of one operation to every registered handler
//!
//! Handlers run strictly in registration order. The first non-empty record is
//! the canonical result; later handlers still run and their records are
//! discarded. Each invocation is captured in a [`HandlerReport`]; the
//! [`FailurePolicy`] decides which failures abort the operation.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::FailurePolicy;
use crate::handler::HandlerOutcome;
use crate::models::{AuthContext, InitOptions, Instance, MethodOptions, Operation};
use crate::registry::Registry;
use crate::resolver::{HandlerResolver, MethodRef, Resolution};
use crate::{Error, Result};

/// What happened when one handler was invoked
#[derive(Debug)]
pub enum InvocationStatus {
    Record,
    NoOpinion,
    Unsupported,
    Failed(Error),
}

impl InvocationStatus {
    pub fn label(&self) -> &'static str {
        match self {
            InvocationStatus::Record => "record",
            InvocationStatus::NoOpinion => "no-opinion",
            InvocationStatus::Unsupported => "unsupported",
            InvocationStatus::Failed(_) => "failed",
        }
    }
}

/// Per-handler entry of a dispatch
#[derive(Debug)]
pub struct HandlerReport {
    /// Registered target label
    pub target: String,
    /// Name reported by the resolved handler
    pub handler: String,
    /// Conventional method key (e.g. `create_encounter`)
    pub key: String,
    pub primary: bool,
    /// Whether this handler's record became the canonical result
    pub canonical: bool,
    pub status: InvocationStatus,
}

/// Outcome of one dispatch
#[derive(Debug)]
pub struct DispatchReport {
    pub model: String,
    pub operation: Operation,
    /// First non-empty record, if any handler produced one
    pub canonical: Option<Instance>,
    pub reports: Vec<HandlerReport>,
    /// Targets that failed to resolve and ran as no-op handlers
    pub diagnostics: Vec<Error>,
}

impl DispatchReport {
    fn empty(model: &str, operation: Operation) -> Self {
        Self {
            model: model.to_string(),
            operation,
            canonical: None,
            reports: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Handlers whose invocation failed but did not abort the operation.
    pub fn failures(&self) -> impl Iterator<Item = (&HandlerReport, &Error)> {
        self.reports.iter().filter_map(|report| match &report.status {
            InvocationStatus::Failed(e) => Some((report, e)),
            _ => None,
        })
    }

    /// True when some handler failed or some target did not resolve.
    pub fn is_partial_failure(&self) -> bool {
        !self.diagnostics.is_empty() || self.failures().next().is_some()
    }

    /// Name of the target that produced the canonical record.
    pub fn canonical_source(&self) -> Option<&str> {
        self.reports
            .iter()
            .find(|report| report.canonical)
            .map(|report| report.target.as_str())
    }

    pub fn into_canonical(self) -> Option<Instance> {
        self.canonical
    }
}

/// Resolves and invokes handlers for one operation
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    resolver: HandlerResolver,
    policy: FailurePolicy,
    require_resolution: bool,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, resolver: HandlerResolver) -> Self {
        Self {
            registry,
            resolver,
            policy: FailurePolicy::default(),
            require_resolution: false,
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fail an operation when every registered target failed to resolve.
    pub fn with_required_resolution(mut self, required: bool) -> Self {
        self.require_resolution = required;
        self
    }

    /// Method references for `operation` on `model`, in registration order.
    pub fn resolve(
        &self,
        model: &str,
        operation: Operation,
        init: &InitOptions,
    ) -> Result<Resolution> {
        let resolution = self
            .resolver
            .resolve_all(&self.registry, model, operation, init);

        if self.require_resolution && resolution.all_failed() {
            let reasons: Vec<String> = resolution
                .diagnostics
                .iter()
                .map(|e| e.to_string())
                .collect();
            return Err(Error::Resolution {
                target: model.to_string(),
                reason: format!(
                    "no target for {} resolved: {}",
                    operation,
                    reasons.join("; ")
                ),
            });
        }

        Ok(resolution)
    }

    /// Resolve and invoke every handler registered for the instance's model.
    pub async fn dispatch(
        &self,
        instance: &Instance,
        operation: Operation,
        auth: Option<&AuthContext>,
        options: &MethodOptions,
        init: &InitOptions,
    ) -> Result<DispatchReport> {
        let resolution = self.resolve(instance.model_name(), operation, init)?;
        self.invoke(resolution, operation, instance, auth, options)
            .await
    }

    /// Invoke resolved method references in order.
    #[tracing::instrument(
        name = "backend_dispatch",
        skip_all,
        fields(
            model = %instance.model,
            operation = %operation,
            handlers = resolution.methods.len(),
        )
    )]
    pub async fn invoke(
        &self,
        resolution: Resolution,
        operation: Operation,
        instance: &Instance,
        auth: Option<&AuthContext>,
        options: &MethodOptions,
    ) -> Result<DispatchReport> {
        let mut report = DispatchReport::empty(instance.model_name(), operation);
        report.diagnostics = resolution.diagnostics;

        for method in &resolution.methods {
            let status = match self.call(method, instance, auth, options).await {
                Ok(HandlerOutcome::Unsupported) => InvocationStatus::Unsupported,
                Ok(outcome) => match outcome.into_record() {
                    Some(record) => {
                        if report.canonical.is_none() {
                            debug!(target_label = %method.target, "Canonical record selected");
                            report.canonical = Some(record);
                            report.reports.push(HandlerReport::new(method, true, InvocationStatus::Record));
                            continue;
                        }
                        InvocationStatus::Record
                    }
                    None => InvocationStatus::NoOpinion,
                },
                Err(e) => {
                    let fatal = match self.policy {
                        FailurePolicy::FailFast => true,
                        FailurePolicy::PrimaryFatal => method.is_primary(),
                        FailurePolicy::Isolate => false,
                    };
                    if fatal {
                        return Err(e);
                    }
                    warn!(
                        handler = method.handler_name(),
                        method = %method.key,
                        error = %e,
                        "Backend handler failed, continuing fan-out"
                    );
                    InvocationStatus::Failed(e)
                }
            };

            report
                .reports
                .push(HandlerReport::new(method, false, status));
        }

        debug!(
            canonical = report.canonical.is_some(),
            failures = report.failures().count(),
            "Dispatch complete"
        );
        Ok(report)
    }

    async fn call(
        &self,
        method: &MethodRef,
        instance: &Instance,
        auth: Option<&AuthContext>,
        options: &MethodOptions,
    ) -> Result<HandlerOutcome> {
        debug!(handler = method.handler_name(), method = %method.key, "Invoking backend handler");
        method
            .handler
            .invoke(method.operation, instance, auth, options)
            .await
            .map_err(|e| Error::dispatch(method.handler_name(), method.operation, e))
    }
}

impl HandlerReport {
    fn new(method: &MethodRef, canonical: bool, status: InvocationStatus) -> Self {
        Self {
            target: method.target.clone(),
            handler: method.handler_name().to_string(),
            key: method.key.clone(),
            primary: method.is_primary(),
            canonical,
            status,
        }
    }
}
