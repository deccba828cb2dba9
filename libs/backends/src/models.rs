//! Core data types passed between the facade, dispatcher and handlers

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Free-form options forwarded to a handler invocation.
pub type MethodOptions = Map<String, JsonValue>;

/// Free-form options handed to a handler factory when a target is resolved.
pub type InitOptions = Map<String, JsonValue>;

/// Identifier field name used when an instance is rendered as JSON.
pub const UUID_FIELD: &str = "uuid";

/// A model instance travelling through the dispatch layer.
///
/// The instance is owned by the caller; the facade only borrows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Model (type) name, used as the registry key (e.g. "Encounter")
    pub model: String,

    /// Stable identifier, absent until assigned locally or by a remote target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    /// Remaining model fields
    #[serde(default)]
    pub fields: Map<String, JsonValue>,
}

impl Instance {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            uuid: None,
            fields: Map::new(),
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    /// Override the identifier when `uuid` is present and not blank.
    pub fn with_supplied_uuid(mut self, uuid: Option<String>) -> Self {
        if let Some(uuid) = uuid.filter(|uuid| !uuid.trim().is_empty()) {
            self.uuid = Some(uuid);
        }
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Build an instance from a JSON object. A top-level `uuid` string is
    /// lifted into the identifier; every other key becomes a field.
    pub fn from_json(model: impl Into<String>, value: JsonValue) -> Result<Self> {
        let JsonValue::Object(mut fields) = value else {
            return Err(Error::Validation(format!(
                "expected a JSON object, got {}",
                json_kind(&value)
            )));
        };

        let uuid = match fields.remove(UUID_FIELD) {
            Some(JsonValue::String(s)) if !s.is_empty() => Some(s),
            Some(JsonValue::Null) | None => None,
            Some(JsonValue::String(_)) => None,
            Some(other) => {
                return Err(Error::Validation(format!(
                    "'{}' must be a string, got {}",
                    UUID_FIELD,
                    json_kind(&other)
                )))
            }
        };

        Ok(Self {
            model: model.into(),
            uuid,
            fields,
        })
    }

    /// Render as a flat JSON object (fields plus `uuid` when set).
    pub fn to_json(&self) -> JsonValue {
        let mut object = self.fields.clone();
        if let Some(uuid) = &self.uuid {
            object.insert(UUID_FIELD.to_string(), JsonValue::String(uuid.clone()));
        }
        JsonValue::Object(object)
    }

    /// Registry lookup key.
    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn field(&self, key: &str) -> Option<&JsonValue> {
        self.fields.get(key)
    }

    /// An instance with neither identifier nor fields carries no information
    /// and counts as "no result" during dispatch.
    pub fn is_empty(&self) -> bool {
        self.uuid.is_none() && self.fields.is_empty()
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// CRUD operation a handler is asked to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Create,
        Operation::Read,
        Operation::Update,
        Operation::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "create" | "post" => Ok(Operation::Create),
            "read" | "get" => Ok(Operation::Read),
            "update" | "put" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(Error::Validation(format!("Unknown operation: {}", other))),
        }
    }
}

/// Credentials extracted from an inbound request and forwarded to handlers
#[derive(Clone, PartialEq, Eq)]
pub enum AuthContext {
    Bearer { token: String },
    Basic { username: String, password: String },
}

impl AuthContext {
    pub fn bearer(token: impl Into<String>) -> Self {
        AuthContext::Bearer {
            token: token.into(),
        }
    }

    /// Parse an `Authorization` header value.
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        let (scheme, credentials) = header
            .split_once(' ')
            .ok_or_else(|| Error::Validation("Authorization header has no scheme".to_string()))?;
        let credentials = credentials.trim();
        if credentials.is_empty() {
            return Err(Error::Validation(
                "Authorization header has empty credentials".to_string(),
            ));
        }

        if scheme.eq_ignore_ascii_case("bearer") {
            return Ok(AuthContext::bearer(credentials));
        }

        if scheme.eq_ignore_ascii_case("basic") {
            let decoded = BASE64.decode(credentials).map_err(|e| {
                Error::Validation(format!("Basic credentials are not valid base64: {}", e))
            })?;
            let decoded = String::from_utf8(decoded).map_err(|_| {
                Error::Validation("Basic credentials are not valid UTF-8".to_string())
            })?;
            let (username, password) = decoded.split_once(':').ok_or_else(|| {
                Error::Validation("Basic credentials must be 'user:password'".to_string())
            })?;
            return Ok(AuthContext::Basic {
                username: username.to_string(),
                password: password.to_string(),
            });
        }

        Err(Error::Validation(format!(
            "Unsupported authorization scheme: {}",
            scheme
        )))
    }

    /// Render back into an `Authorization` header value.
    pub fn authorization_header(&self) -> String {
        match self {
            AuthContext::Bearer { token } => format!("Bearer {}", token),
            AuthContext::Basic { username, password } => {
                format!("Basic {}", BASE64.encode(format!("{}:{}", username, password)))
            }
        }
    }

    pub fn principal(&self) -> Option<&str> {
        match self {
            AuthContext::Bearer { .. } => None,
            AuthContext::Basic { username, .. } => Some(username),
        }
    }
}

// Credentials stay out of logs.
impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthContext::Bearer { .. } => f.write_str("AuthContext::Bearer(***)"),
            AuthContext::Basic { username, .. } => {
                write!(f, "AuthContext::Basic({}, ***)", username)
            }
        }
    }
}
