//! Handler resolution
//!
//! Turns registered [`HandlerDescriptor`]s into live handlers and method
//! references for one operation. Target identifiers are looked up in a
//! [`PluginTable`] built at startup; an identifier that is unknown, or whose
//! factory fails, degrades to [`NoopHandler`] and is reported as a diagnostic.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::RemoteConfig;
use crate::handler::{BackendHandler, LogHandler, NoopHandler};
use crate::models::{InitOptions, Operation};
use crate::registry::{HandlerDescriptor, Registry};
use crate::remote::{RemoteHandler, REMOTE_TARGET};
use crate::{Error, Result};

/// Builds a handler from init options.
pub type HandlerFactory =
    Arc<dyn Fn(&InitOptions) -> Result<Arc<dyn BackendHandler>> + Send + Sync>;

/// Conventional method key, `"{operation}_{model_lowercase}"` (e.g. `create_encounter`).
pub fn method_key(operation: Operation, model: &str) -> String {
    format!("{}_{}", operation.as_str(), model.to_lowercase())
}

/// Startup-time table of target identifiers to handler factories
#[derive(Clone, Default)]
pub struct PluginTable {
    factories: BTreeMap<String, HandlerFactory>,
}

impl PluginTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the built-in targets: `noop`, `log` and `remote`.
    pub fn builtin(remote: &RemoteConfig) -> Self {
        let mut table = Self::new();
        table.register("noop", |_| Ok(Arc::new(NoopHandler) as Arc<dyn BackendHandler>));
        table.register("log", |options| {
            let label = options
                .get("label")
                .and_then(|v| v.as_str())
                .unwrap_or("log");
            Ok(Arc::new(LogHandler::new(label)) as Arc<dyn BackendHandler>)
        });

        let remote = remote.clone();
        table.register(REMOTE_TARGET, move |options| {
            Ok(Arc::new(RemoteHandler::from_options(&remote, options)?) as Arc<dyn BackendHandler>)
        });
        table
    }

    /// Register (or replace) the factory for `target`.
    pub fn register<F>(&mut self, target: impl Into<String>, factory: F)
    where
        F: Fn(&InitOptions) -> Result<Arc<dyn BackendHandler>> + Send + Sync + 'static,
    {
        self.factories.insert(target.into(), Arc::new(factory));
    }

    /// Register a live handler that every resolution of `target` shares.
    pub fn register_handler(&mut self, target: impl Into<String>, handler: Arc<dyn BackendHandler>) {
        self.register(target, move |_| Ok(handler.clone()));
    }

    pub fn get(&self, target: &str) -> Option<&HandlerFactory> {
        self.factories.get(target)
    }
}

impl fmt::Debug for PluginTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginTable")
            .field("targets", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A handler bound to one operation on one model
#[derive(Clone)]
pub struct MethodRef {
    pub handler: Arc<dyn BackendHandler>,
    pub operation: Operation,
    pub model: String,
    /// Conventional method key, see [`method_key`]
    pub key: String,
    /// Label of the registered target this came from
    pub target: String,
    /// Position in the registry list; 0 is the primary
    pub position: usize,
}

impl MethodRef {
    pub fn is_primary(&self) -> bool {
        self.position == 0
    }

    pub fn handler_name(&self) -> &str {
        self.handler.name()
    }
}

impl fmt::Debug for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRef")
            .field("handler", &self.handler.name())
            .field("key", &self.key)
            .field("target", &self.target)
            .field("position", &self.position)
            .finish()
    }
}

/// Method references for one (model, operation) plus resolution diagnostics
#[derive(Debug, Default)]
pub struct Resolution {
    pub methods: Vec<MethodRef>,
    /// Targets that could not be resolved (each degraded to the no-op handler)
    pub diagnostics: Vec<Error>,
    /// Number of targets registered for the model
    pub registered: usize,
}

impl Resolution {
    /// True when targets are registered but none of them resolved.
    pub fn all_failed(&self) -> bool {
        self.registered > 0 && self.diagnostics.len() == self.registered
    }
}

/// Resolves registered descriptors against a plugin table
#[derive(Debug, Clone)]
pub struct HandlerResolver {
    plugins: Arc<PluginTable>,
}

impl HandlerResolver {
    pub fn new(plugins: Arc<PluginTable>) -> Self {
        Self { plugins }
    }

    /// Resolve one descriptor into a live handler.
    pub fn resolve(
        &self,
        descriptor: &HandlerDescriptor,
        init: &InitOptions,
    ) -> Result<Arc<dyn BackendHandler>> {
        match descriptor {
            HandlerDescriptor::Handler(handler) => Ok(handler.clone()),
            HandlerDescriptor::Factory { name, factory } => {
                factory(init).map_err(|e| Error::Resolution {
                    target: name.clone(),
                    reason: e.to_string(),
                })
            }
            HandlerDescriptor::Reference(target) => {
                let factory = self.plugins.get(target).ok_or_else(|| Error::Resolution {
                    target: target.clone(),
                    reason: "no handler factory registered for this target".to_string(),
                })?;
                factory(init).map_err(|e| Error::Resolution {
                    target: target.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Like [`resolve`](Self::resolve), but an unresolvable target yields the
    /// no-op handler together with the resolution error.
    pub fn resolve_or_noop(
        &self,
        descriptor: &HandlerDescriptor,
        init: &InitOptions,
    ) -> (Arc<dyn BackendHandler>, Option<Error>) {
        match self.resolve(descriptor, init) {
            Ok(handler) => (handler, None),
            Err(e) => {
                warn!(
                    backend = %descriptor.label(),
                    error = %e,
                    "Backend target unresolved, falling back to no-op handler"
                );
                (Arc::new(NoopHandler), Some(e))
            }
        }
    }

    /// Bind `handler` to `operation` on `model`, or `None` if the handler does
    /// not support that combination.
    pub fn resolve_method(
        handler: Arc<dyn BackendHandler>,
        operation: Operation,
        model: &str,
    ) -> Option<MethodRef> {
        let key = method_key(operation, model);
        if !handler.supports(model, operation) {
            debug!(handler = handler.name(), method = %key, "Handler does not implement method");
            return None;
        }

        Some(MethodRef {
            target: handler.name().to_string(),
            handler,
            operation,
            model: model.to_string(),
            key,
            position: 0,
        })
    }

    /// Resolve every target registered for `model` into method references for
    /// `operation`, in registration order.
    pub fn resolve_all(
        &self,
        registry: &Registry,
        model: &str,
        operation: Operation,
        init: &InitOptions,
    ) -> Resolution {
        let descriptors = registry.list(model);
        let mut resolution = Resolution {
            methods: Vec::with_capacity(descriptors.len()),
            diagnostics: Vec::new(),
            registered: descriptors.len(),
        };

        for (position, descriptor) in descriptors.iter().enumerate() {
            let (handler, diagnostic) = self.resolve_or_noop(descriptor, init);
            if let Some(e) = diagnostic {
                resolution.diagnostics.push(e);
            }

            if let Some(mut method) = Self::resolve_method(handler, operation, model) {
                method.target = descriptor.label();
                method.position = position;
                resolution.methods.push(method);
            }
        }

        resolution
    }
}
