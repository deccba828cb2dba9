//! Pluggable backend dispatch for CRUD operations
//!
//! Model instances are fanned out to an ordered list of backend targets per
//! model name:
//! - [`Registry`] maps model names to target descriptors (first is primary)
//! - [`HandlerResolver`] turns descriptors into live handlers via a
//!   startup-time [`PluginTable`]
//! - [`Dispatcher`] invokes handlers in order and picks the canonical record
//! - [`Backends`] is the CRUD facade; [`DispatchingService`] adds persistence

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod facade;
pub mod handler;
pub mod models;
pub mod registry;
pub mod remote;
pub mod resolver;
pub mod service;
pub mod store;

pub use config::{BackendsConfig, Config, FailurePolicy, LoggingConfig, RemoteConfig, TargetMode};
pub use dispatcher::{DispatchReport, Dispatcher, HandlerReport, InvocationStatus};
pub use error::{Error, Result};
pub use facade::Backends;
pub use handler::{BackendHandler, HandlerOutcome, LogHandler, NoopHandler};
pub use models::{AuthContext, InitOptions, Instance, MethodOptions, Operation};
pub use registry::{HandlerDescriptor, Registry, TargetMap};
pub use remote::RemoteHandler;
pub use resolver::{method_key, HandlerFactory, HandlerResolver, MethodRef, PluginTable, Resolution};
pub use service::DispatchingService;
pub use store::{InstanceStore, MemoryStore};
