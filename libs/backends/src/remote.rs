//! Remote dispatch server backend
//!
//! Forwards instances as JSON to `{base_url}/{model}/` over HTTP:
//! create -> `POST {model}/`, read -> `GET {model}/{uuid}/`,
//! update -> `PUT {model}/{uuid}/`, delete -> `DELETE {model}/{uuid}/`.

use async_trait::async_trait;
use reqwest::{header, Client, Method, StatusCode};
use serde_json::Value as JsonValue;
use std::time::Duration;

use crate::config::RemoteConfig;
use crate::handler::{BackendHandler, HandlerOutcome};
use crate::models::{AuthContext, InitOptions, Instance, MethodOptions, Operation};
use crate::{Error, Result};

/// Target identifier of the remote handler in the plugin table.
pub const REMOTE_TARGET: &str = "remote";

/// Client for a remote dispatch server.
pub struct RemoteHandler {
    name: String,
    client: Client,
    base_url: String,
    /// Restrict to these models; `None` accepts every model
    models: Option<Vec<String>>,
}

impl RemoteHandler {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: REMOTE_TARGET.to_string(),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            models: None,
        })
    }

    /// Build from configuration, with init options taking precedence:
    /// `base_url`, `timeout_seconds`, `name`, and `models` (list of model names).
    pub fn from_options(config: &RemoteConfig, options: &InitOptions) -> Result<Self> {
        let base_url = options
            .get("base_url")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| config.base_url.clone())
            .ok_or_else(|| {
                Error::Configuration("remote handler requires a base_url".to_string())
            })?;

        let timeout_seconds = options
            .get("timeout_seconds")
            .and_then(|v| v.as_u64())
            .unwrap_or(config.timeout_seconds);

        let mut handler = Self::new(base_url, Duration::from_secs(timeout_seconds))?;

        if let Some(name) = options.get("name").and_then(|v| v.as_str()) {
            handler.name = name.to_string();
        }

        if let Some(models) = options.get("models") {
            let models = models
                .as_array()
                .ok_or_else(|| {
                    Error::Configuration("remote handler 'models' must be a list".to_string())
                })?
                .iter()
                .map(|m| {
                    m.as_str().map(str::to_string).ok_or_else(|| {
                        Error::Configuration(
                            "remote handler 'models' entries must be strings".to_string(),
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            handler.models = Some(models);
        }

        Ok(handler)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, model: &str) -> String {
        format!("{}/{}/", self.base_url, model.to_lowercase())
    }

    fn item_url(&self, model: &str, uuid: &str) -> String {
        format!(
            "{}/{}/{}/",
            self.base_url,
            model.to_lowercase(),
            urlencoding::encode(uuid)
        )
    }

    fn require_uuid<'a>(&self, instance: &'a Instance, operation: Operation) -> Result<&'a str> {
        instance.uuid.as_deref().ok_or_else(|| {
            Error::Validation(format!(
                "UUID required for {} of {}",
                operation, instance.model
            ))
        })
    }

    async fn send(
        &self,
        method: Method,
        url: String,
        instance: &Instance,
        auth: Option<&AuthContext>,
        options: &MethodOptions,
        with_body: bool,
    ) -> Result<HandlerOutcome> {
        let mut request = self.client.request(method.clone(), &url);

        let query = query_pairs(options);
        if !query.is_empty() {
            request = request.query(&query);
        }
        if let Some(auth) = auth {
            request = request.header(header::AUTHORIZATION, auth.authorization_header());
        }
        if with_body {
            request = request.json(&instance.to_json());
        }

        tracing::debug!(%method, %url, model = %instance.model, "Forwarding to remote target");
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            tracing::debug!(%url, "Remote target has no record");
            return Ok(HandlerOutcome::NoOpinion);
        }
        if !status.is_success() {
            return Err(Error::Backend(format!(
                "{} {} returned status {}",
                method, url, status
            )));
        }

        let body = response.bytes().await?;
        parse_record(&instance.model, &body)
    }
}

#[async_trait]
impl BackendHandler for RemoteHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, model: &str, _operation: Operation) -> bool {
        match &self.models {
            Some(models) => models.iter().any(|m| m == model),
            None => true,
        }
    }

    async fn create(
        &self,
        instance: &Instance,
        auth: Option<&AuthContext>,
        options: &MethodOptions,
    ) -> Result<HandlerOutcome> {
        let url = self.collection_url(&instance.model);
        self.send(Method::POST, url, instance, auth, options, true)
            .await
    }

    async fn read(
        &self,
        instance: &Instance,
        auth: Option<&AuthContext>,
        options: &MethodOptions,
    ) -> Result<HandlerOutcome> {
        let uuid = self.require_uuid(instance, Operation::Read)?;
        let url = self.item_url(&instance.model, uuid);
        self.send(Method::GET, url, instance, auth, options, false)
            .await
    }

    async fn update(
        &self,
        instance: &Instance,
        auth: Option<&AuthContext>,
        options: &MethodOptions,
    ) -> Result<HandlerOutcome> {
        let uuid = self.require_uuid(instance, Operation::Update)?;
        let url = self.item_url(&instance.model, uuid);
        self.send(Method::PUT, url, instance, auth, options, true)
            .await
    }

    async fn delete(
        &self,
        instance: &Instance,
        auth: Option<&AuthContext>,
        options: &MethodOptions,
    ) -> Result<HandlerOutcome> {
        let uuid = self.require_uuid(instance, Operation::Delete)?;
        let url = self.item_url(&instance.model, uuid);
        self.send(Method::DELETE, url, instance, auth, options, false)
            .await
    }
}

/// Scalar method options become query parameters; nested values are skipped.
fn query_pairs(options: &MethodOptions) -> Vec<(String, String)> {
    options
        .iter()
        .filter_map(|(k, v)| match v {
            JsonValue::String(s) => Some((k.clone(), s.clone())),
            JsonValue::Number(n) => Some((k.clone(), n.to_string())),
            JsonValue::Bool(b) => Some((k.clone(), b.to_string())),
            _ => None,
        })
        .collect()
}

/// Map a response body to an outcome.
///
/// Accepts a bare object or an envelope `{"data": [...]}` / `{"data": {...}}`
/// (first element wins). Empty bodies and non-object payloads have no opinion.
fn parse_record(model: &str, body: &[u8]) -> Result<HandlerOutcome> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(HandlerOutcome::NoOpinion);
    }

    let value: JsonValue = serde_json::from_slice(body)?;
    let record = match value {
        JsonValue::Object(mut object) => match object.remove("data") {
            Some(JsonValue::Array(items)) => items.into_iter().next(),
            Some(data @ JsonValue::Object(_)) => Some(data),
            Some(_) => None,
            None => Some(JsonValue::Object(object)),
        },
        _ => None,
    };

    match record {
        Some(value @ JsonValue::Object(_)) => {
            Ok(HandlerOutcome::Record(Instance::from_json(model, value)?))
        }
        _ => Ok(HandlerOutcome::NoOpinion),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bare_objects_and_envelopes() {
        let bare = parse_record("Encounter", br#"{"uuid": "r1", "concept": "x"}"#).unwrap();
        assert_eq!(
            bare.into_record().and_then(|i| i.uuid),
            Some("r1".to_string())
        );

        let envelope =
            parse_record("Encounter", br#"{"status": "SUCCESS", "data": [{"uuid": "r2"}, {"uuid": "r3"}]}"#)
                .unwrap();
        assert_eq!(
            envelope.into_record().and_then(|i| i.uuid),
            Some("r2".to_string())
        );

        let single = parse_record("Encounter", br#"{"data": {"uuid": "r4"}}"#).unwrap();
        assert_eq!(
            single.into_record().and_then(|i| i.uuid),
            Some("r4".to_string())
        );
    }

    #[test]
    fn empty_or_scalar_bodies_have_no_opinion() {
        assert_eq!(parse_record("Encounter", b"").unwrap(), HandlerOutcome::NoOpinion);
        assert_eq!(parse_record("Encounter", b"  \n").unwrap(), HandlerOutcome::NoOpinion);
        assert_eq!(
            parse_record("Encounter", br#""Successfully deleted""#).unwrap(),
            HandlerOutcome::NoOpinion
        );
        assert_eq!(
            parse_record("Encounter", br#"{"data": []}"#).unwrap(),
            HandlerOutcome::NoOpinion
        );
        assert!(parse_record("Encounter", b"{not json").is_err());
    }

    #[test]
    fn from_options_overrides_config() {
        let config = RemoteConfig {
            base_url: Some("http://config.example/api/".to_string()),
            timeout_seconds: 5,
        };
        let mut options = InitOptions::new();
        options.insert("name".to_string(), json!("openmrs"));
        options.insert("models".to_string(), json!(["Encounter"]));

        let handler = RemoteHandler::from_options(&config, &options).unwrap();
        assert_eq!(handler.name(), "openmrs");
        assert_eq!(handler.base_url(), "http://config.example/api");
        assert!(handler.supports("Encounter", Operation::Create));
        assert!(!handler.supports("Subject", Operation::Create));
        assert_eq!(
            handler.item_url("Encounter", "a b"),
            "http://config.example/api/encounter/a%20b/"
        );
    }

    #[test]
    fn from_options_requires_base_url() {
        let err = RemoteHandler::from_options(&RemoteConfig::default(), &InitOptions::new())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn only_scalar_options_become_query_parameters() {
        let mut options = MethodOptions::new();
        options.insert("format".to_string(), json!("full"));
        options.insert("limit".to_string(), json!(5));
        options.insert("nested".to_string(), json!({"a": 1}));
        let mut pairs = query_pairs(&options);
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("format".to_string(), "full".to_string()),
                ("limit".to_string(), "5".to_string())
            ]
        );
    }
}
