#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mds_backends::{
    AuthContext, BackendHandler, Backends, HandlerOutcome, Instance, MethodOptions, Operation,
    PluginTable, Registry, Result,
};

/// How a [`RecordingHandler`] answers
#[derive(Debug, Clone)]
pub enum Respond {
    /// No opinion
    Nothing,
    /// The input instance, re-identified when a uuid is given
    Echo(Option<String>),
    /// A backend error with this message
    Fail(String),
}

/// Handler names in invocation order, shared across handlers
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Handler that records every invocation and answers as configured
pub struct RecordingHandler {
    name: String,
    respond: Respond,
    calls: Mutex<Vec<(Operation, Instance, Option<AuthContext>)>>,
    log: Option<CallLog>,
}

impl RecordingHandler {
    pub fn new(name: &str, respond: Respond) -> Arc<Self> {
        Self::build(name, respond, None)
    }

    /// Like [`RecordingHandler::new`], also appending its name to `log` on every call.
    pub fn logged(name: &str, respond: Respond, log: &CallLog) -> Arc<Self> {
        Self::build(name, respond, Some(log.clone()))
    }

    fn build(name: &str, respond: Respond, log: Option<CallLog>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            respond,
            calls: Mutex::new(Vec::new()),
            log,
        })
    }

    pub fn calls(&self) -> Vec<(Operation, Instance, Option<AuthContext>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.calls().into_iter().map(|(op, _, _)| op).collect()
    }
}

#[async_trait]
impl BackendHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        operation: Operation,
        instance: &Instance,
        auth: Option<&AuthContext>,
        _options: &MethodOptions,
    ) -> Result<HandlerOutcome> {
        self.calls
            .lock()
            .unwrap()
            .push((operation, instance.clone(), auth.cloned()));
        if let Some(log) = &self.log {
            log.lock().unwrap().push(self.name.clone());
        }

        match &self.respond {
            Respond::Nothing => Ok(HandlerOutcome::NoOpinion),
            Respond::Echo(None) => Ok(HandlerOutcome::Record(instance.clone())),
            Respond::Echo(Some(uuid)) => {
                Ok(HandlerOutcome::Record(instance.clone().with_uuid(uuid.as_str())))
            }
            Respond::Fail(message) => Err(mds_backends::Error::Backend(message.clone())),
        }
    }
}

/// Echoes the input back with the given identifier.
pub fn echo_handler(name: &str, uuid: &str) -> Arc<RecordingHandler> {
    RecordingHandler::new(name, Respond::Echo(Some(uuid.to_string())))
}

pub fn silent_handler(name: &str) -> Arc<RecordingHandler> {
    RecordingHandler::new(name, Respond::Nothing)
}

pub fn failing_handler(name: &str) -> Arc<RecordingHandler> {
    RecordingHandler::new(name, Respond::Fail(format!("{} unavailable", name)))
}

/// Plugin table exposing each handler under its own name.
pub fn plugins(handlers: &[&Arc<RecordingHandler>]) -> PluginTable {
    let mut table = PluginTable::new();
    for handler in handlers {
        let handler: Arc<dyn BackendHandler> = (*handler).clone();
        table.register_handler(handler.name().to_string(), handler);
    }
    table
}

/// Registry of `model` -> ordered target names.
pub fn registry(model: &str, targets: &[&str]) -> Registry {
    let mut registry = Registry::new();
    for target in targets {
        registry.register(model, *target);
    }
    registry
}

/// Facade over `registry` with each handler registered as a plugin.
pub fn backends(registry: Registry, handlers: &[&Arc<RecordingHandler>]) -> Backends {
    Backends::new(Arc::new(registry), Arc::new(plugins(handlers)))
}

pub fn widget() -> Instance {
    Instance::new("Widget").with_field("name", "sprocket")
}
