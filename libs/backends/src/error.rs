//! Error types for backend dispatch

use thiserror::Error;

use crate::models::Operation;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unable to resolve target '{target}': {reason}")]
    Resolution { target: String, reason: String },

    #[error("Handler '{handler}' failed during {operation}: {source}")]
    Dispatch {
        handler: String,
        operation: Operation,
        #[source]
        source: Box<Error>,
    },

    #[error("Not found: {model} '{uuid}'")]
    NotFound { model: String, uuid: String },

    #[error("Multiple objects returned: {model} '{uuid}'")]
    Conflict { model: String, uuid: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config source error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Wrap a handler failure with the handler name and operation it came from.
    pub fn dispatch(handler: impl Into<String>, operation: Operation, source: Error) -> Self {
        Error::Dispatch {
            handler: handler.into(),
            operation,
            source: Box::new(source),
        }
    }

    /// True for errors raised by the persistence collaborator that callers
    /// usually map to "not found" / "multiple matches" responses.
    pub fn is_lookup_failure(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::Conflict { .. })
    }
}
