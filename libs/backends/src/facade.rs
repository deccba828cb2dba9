//! CRUD facade over the dispatcher
//!
//! Each call derives the model name from the instance, dispatches the
//! operation to every registered target and returns the canonical record.
//! Persistence is the caller's responsibility.

use std::sync::Arc;

use tracing::info;

use crate::config::{BackendsConfig, FailurePolicy, TargetMode};
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::models::{AuthContext, InitOptions, Instance, MethodOptions, Operation};
use crate::registry::Registry;
use crate::resolver::{HandlerResolver, PluginTable};
use crate::Result;

#[derive(Debug, Clone)]
pub struct Backends {
    dispatcher: Dispatcher,
    target: TargetMode,
    init: InitOptions,
}

impl Backends {
    pub fn new(registry: Arc<Registry>, plugins: Arc<PluginTable>) -> Self {
        Self {
            dispatcher: Dispatcher::new(registry, HandlerResolver::new(plugins)),
            target: TargetMode::default(),
            init: InitOptions::new(),
        }
    }

    /// Facade configured with the target mode, failure policy, resolution
    /// strictness and factory init options of `config`.
    pub fn from_config(
        config: &BackendsConfig,
        registry: Arc<Registry>,
        plugins: Arc<PluginTable>,
    ) -> Self {
        Self::new(registry, plugins)
            .with_target(config.target.clone())
            .with_policy(config.failure_policy)
            .with_required_resolution(config.require_resolution)
            .with_init_options(config.init_options.clone())
    }

    pub fn with_target(mut self, target: TargetMode) -> Self {
        self.target = target;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.dispatcher = self.dispatcher.with_policy(policy);
        self
    }

    pub fn with_required_resolution(mut self, required: bool) -> Self {
        self.dispatcher = self.dispatcher.with_required_resolution(required);
        self
    }

    /// Options handed to handler factories whenever a target is resolved.
    pub fn with_init_options(mut self, init: InitOptions) -> Self {
        self.init = init;
        self
    }

    pub async fn create(
        &self,
        instance: &mut Instance,
        auth: Option<&AuthContext>,
        options: &MethodOptions,
    ) -> Result<Option<Instance>> {
        Ok(self
            .create_with_report(instance, auth, options)
            .await?
            .into_canonical())
    }

    pub async fn read(
        &self,
        instance: &Instance,
        auth: Option<&AuthContext>,
        options: &MethodOptions,
    ) -> Result<Option<Instance>> {
        Ok(self
            .execute(Operation::Read, instance, auth, options)
            .await?
            .into_canonical())
    }

    pub async fn update(
        &self,
        instance: &Instance,
        auth: Option<&AuthContext>,
        options: &MethodOptions,
    ) -> Result<Option<Instance>> {
        Ok(self
            .execute(Operation::Update, instance, auth, options)
            .await?
            .into_canonical())
    }

    pub async fn delete(
        &self,
        instance: &Instance,
        auth: Option<&AuthContext>,
        options: &MethodOptions,
    ) -> Result<Option<Instance>> {
        Ok(self
            .execute(Operation::Delete, instance, auth, options)
            .await?
            .into_canonical())
    }

    /// Create, returning the full dispatch report.
    ///
    /// When the target mode names a remote authority and the canonical record
    /// carries a different identifier, the local instance adopts it.
    pub async fn create_with_report(
        &self,
        instance: &mut Instance,
        auth: Option<&AuthContext>,
        options: &MethodOptions,
    ) -> Result<DispatchReport> {
        let report = self
            .execute(Operation::Create, instance, auth, options)
            .await?;

        if !self.target.is_self() {
            self.reconcile(instance, &report);
        }
        Ok(report)
    }

    /// Dispatch any operation without reconciliation, returning the report.
    pub async fn execute(
        &self,
        operation: Operation,
        instance: &Instance,
        auth: Option<&AuthContext>,
        options: &MethodOptions,
    ) -> Result<DispatchReport> {
        self.dispatcher
            .dispatch(instance, operation, auth, options, &self.init)
            .await
    }

    fn reconcile(&self, instance: &mut Instance, report: &DispatchReport) {
        let Some(remote_uuid) = report.canonical.as_ref().and_then(|c| c.uuid.as_deref()) else {
            return;
        };
        if instance.uuid.as_deref() == Some(remote_uuid) {
            return;
        }

        info!(
            model = %instance.model,
            local = instance.uuid.as_deref().unwrap_or("-"),
            remote = remote_uuid,
            authority = %self.target,
            "Adopting remote identifier"
        );
        instance.uuid = Some(remote_uuid.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{BackendHandler, HandlerOutcome};
    use async_trait::async_trait;

    /// Answers every create with the instance re-identified as `uuid`.
    struct Assigns(&'static str);

    #[async_trait]
    impl BackendHandler for Assigns {
        fn name(&self) -> &str {
            "assigns"
        }

        async fn create(
            &self,
            instance: &Instance,
            _auth: Option<&AuthContext>,
            _options: &MethodOptions,
        ) -> Result<HandlerOutcome> {
            Ok(HandlerOutcome::Record(instance.clone().with_uuid(self.0)))
        }
    }

    fn backends(target: TargetMode) -> Backends {
        let mut plugins = PluginTable::new();
        plugins.register_handler("assigns", Arc::new(Assigns("B")));
        let mut registry = Registry::new();
        registry.register("Encounter", "assigns");
        Backends::new(Arc::new(registry), Arc::new(plugins)).with_target(target)
    }

    #[tokio::test]
    async fn create_adopts_remote_identifier() {
        let backends = backends(TargetMode::Remote("openmrs".to_string()));
        let mut instance = Instance::new("Encounter").with_uuid("A");

        let result = backends
            .create(&mut instance, None, &MethodOptions::new())
            .await
            .unwrap();

        assert_eq!(result.and_then(|r| r.uuid).as_deref(), Some("B"));
        assert_eq!(instance.uuid.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn self_target_keeps_local_identifier() {
        let backends = backends(TargetMode::SelfTarget);
        let mut instance = Instance::new("Encounter").with_uuid("A");

        let result = backends
            .create(&mut instance, None, &MethodOptions::new())
            .await
            .unwrap();

        assert_eq!(result.and_then(|r| r.uuid).as_deref(), Some("B"));
        assert_eq!(instance.uuid.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn other_operations_never_reconcile() {
        let backends = backends(TargetMode::Remote("openmrs".to_string()));
        let instance = Instance::new("Encounter").with_uuid("A");

        // Assigns only implements create
        let report = backends
            .execute(Operation::Update, &instance, None, &MethodOptions::new())
            .await
            .unwrap();
        assert!(report.canonical.is_none());
        assert_eq!(report.reports[0].status.label(), "unsupported");
    }

    #[tokio::test]
    async fn unregistered_model_yields_none() {
        let backends = backends(TargetMode::SelfTarget);
        let result = backends
            .read(&Instance::new("Subject").with_uuid("s1"), None, &MethodOptions::new())
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
