//! Handler registry: model name -> ordered backend targets
//!
//! The registry is built once at startup (explicitly or through
//! [`Registry::autoconfigure`]) and then shared read-only behind an `Arc`.
//! Insertion order is dispatch order; the first target is the primary.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::BackendsConfig;
use crate::handler::BackendHandler;
use crate::resolver::HandlerFactory;
use crate::{Error, Result};

/// Mapping from model name to target identifiers, as found in configuration.
pub type TargetMap = BTreeMap<String, Vec<String>>;

/// A registered backend target
#[derive(Clone)]
pub enum HandlerDescriptor {
    /// Live handler, used as-is
    Handler(Arc<dyn BackendHandler>),
    /// Factory invoked with the init options of every dispatch
    Factory { name: String, factory: HandlerFactory },
    /// Target identifier resolved through the plugin table at dispatch time
    Reference(String),
}

impl HandlerDescriptor {
    pub fn handler(handler: Arc<dyn BackendHandler>) -> Self {
        HandlerDescriptor::Handler(handler)
    }

    pub fn reference(target: impl Into<String>) -> Self {
        HandlerDescriptor::Reference(target.into())
    }

    pub fn factory(name: impl Into<String>, factory: HandlerFactory) -> Self {
        HandlerDescriptor::Factory {
            name: name.into(),
            factory,
        }
    }

    /// Human-readable label for logs and listings.
    pub fn label(&self) -> String {
        match self {
            HandlerDescriptor::Handler(handler) => handler.name().to_string(),
            HandlerDescriptor::Factory { name, .. } => name.clone(),
            HandlerDescriptor::Reference(target) => target.clone(),
        }
    }
}

/// Live handlers and factories compare by identity, references by value.
impl PartialEq for HandlerDescriptor {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HandlerDescriptor::Handler(a), HandlerDescriptor::Handler(b)) => {
                Arc::ptr_eq(a, b)
            }
            (
                HandlerDescriptor::Factory { factory: a, .. },
                HandlerDescriptor::Factory { factory: b, .. },
            ) => Arc::ptr_eq(a, b),
            (HandlerDescriptor::Reference(a), HandlerDescriptor::Reference(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerDescriptor::Handler(handler) => {
                f.debug_tuple("Handler").field(&handler.name()).finish()
            }
            HandlerDescriptor::Factory { name, .. } => f.debug_tuple("Factory").field(name).finish(),
            HandlerDescriptor::Reference(target) => f.debug_tuple("Reference").field(target).finish(),
        }
    }
}

impl From<&str> for HandlerDescriptor {
    fn from(target: &str) -> Self {
        HandlerDescriptor::reference(target)
    }
}

impl From<String> for HandlerDescriptor {
    fn from(target: String) -> Self {
        HandlerDescriptor::Reference(target)
    }
}

impl From<Arc<dyn BackendHandler>> for HandlerDescriptor {
    fn from(handler: Arc<dyn BackendHandler>) -> Self {
        HandlerDescriptor::Handler(handler)
    }
}

/// Registry of backend targets per model
#[derive(Debug, Default, Clone)]
pub struct Registry {
    handlers: BTreeMap<String, Vec<HandlerDescriptor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `target` to the model's list unless it is already present.
    ///
    /// Returns `true` when the target was added.
    pub fn register(&mut self, model: &str, target: impl Into<HandlerDescriptor>) -> bool {
        let target = target.into();
        let list = self.handlers.entry(model.to_string()).or_default();
        if list.contains(&target) {
            debug!(model, backend = %target.label(), "Target already registered");
            return false;
        }

        info!(
            model,
            backend = %target.label(),
            position = list.len(),
            "Registering backend target"
        );
        list.push(target);
        true
    }

    /// Remove `target` from the model's list. Returns `true` if it was present.
    pub fn remove(&mut self, model: &str, target: &HandlerDescriptor) -> bool {
        let Some(list) = self.handlers.get_mut(model) else {
            return false;
        };

        let before = list.len();
        list.retain(|existing| existing != target);
        let removed = list.len() != before;
        if removed {
            info!(model, backend = %target.label(), "Removed backend target");
        }
        if list.is_empty() {
            self.handlers.remove(model);
        }
        removed
    }

    /// Ordered targets for a model; empty when none are registered.
    pub fn list(&self, model: &str) -> &[HandlerDescriptor] {
        self.handlers
            .get(model)
            .map(|list| list.as_slice())
            .unwrap_or(&[])
    }

    /// The first registered target for a model.
    pub fn primary(&self, model: &str) -> Option<&HandlerDescriptor> {
        self.list(model).first()
    }

    /// Register every target of `mapping`, falling back to the targets table
    /// of `config` when no mapping (or an empty one) is supplied.
    ///
    /// Returns the number of newly registered targets.
    pub fn autoconfigure(
        &mut self,
        mapping: Option<&TargetMap>,
        config: &BackendsConfig,
    ) -> Result<usize> {
        let mapping = match mapping {
            Some(mapping) if !mapping.is_empty() => mapping,
            _ if !config.targets.is_empty() => &config.targets,
            _ => {
                return Err(Error::Configuration(
                    "backends.targets must be defined to autoconfigure backend handlers"
                        .to_string(),
                ))
            }
        };

        let mut added = 0;
        for (model, targets) in mapping {
            for target in targets {
                if self.register(model, target.as_str()) {
                    added += 1;
                }
            }
        }

        info!(
            models = mapping.len(),
            targets = added,
            "Backend registry autoconfigured"
        );
        Ok(added)
    }

    /// Model names with at least one registered target.
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
