//! Configuration for backend dispatch
//!
//! Sources are layered: struct defaults, then an optional TOML/YAML/JSON file
//! (`mds.*` in the working directory, or an explicit path), then environment
//! variables prefixed with `MDS` using `__` as the nesting separator
//! (e.g. `MDS__BACKENDS__TARGET=SELF`, `MDS__LOGGING__LEVEL=debug`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::models::InitOptions;
use crate::registry::TargetMap;
use crate::{Error, Result};

const DEFAULT_CONFIG_NAME: &str = "mds";
const ENV_PREFIX: &str = "MDS";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backends: BackendsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from `mds.*` (if present) and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load with an explicit configuration file. The file must exist.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Reject values that would only fail later, at dispatch time.
    pub fn validate(&self) -> Result<()> {
        self.backends.validate()?;
        self.logging.validate()
    }
}

/// Backend dispatch settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    /// Which store is authoritative for identifiers
    pub target: TargetMode,

    /// Model name -> ordered target identifiers (first is primary)
    pub targets: TargetMap,

    /// What a handler failure does to the rest of the fan-out
    pub failure_policy: FailurePolicy,

    /// Fail an operation when every registered target failed to resolve
    pub require_resolution: bool,

    /// Options handed to handler factories on resolution (e.g. the remote
    /// `models` allow-list or the `log` label)
    pub init_options: InitOptions,

    pub remote: RemoteConfig,
}

impl BackendsConfig {
    pub fn validate(&self) -> Result<()> {
        let uses_remote = self
            .targets
            .values()
            .flatten()
            .any(|target| target == crate::remote::REMOTE_TARGET);
        if uses_remote && self.remote.base_url.is_none() {
            return Err(Error::Configuration(
                "backends.remote.base_url is required when a 'remote' target is configured"
                    .to_string(),
            ));
        }

        if let Some(base_url) = &self.remote.base_url {
            if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                return Err(Error::Configuration(format!(
                    "backends.remote.base_url must be an http(s) URL, got '{}'",
                    base_url
                )));
            }
        }

        if self.remote.timeout_seconds == 0 {
            return Err(Error::Configuration(
                "backends.remote.timeout_seconds must be greater than zero".to_string(),
            ));
        }

        for (model, targets) in &self.targets {
            if model.trim().is_empty() {
                return Err(Error::Configuration(
                    "backends.targets contains an empty model name".to_string(),
                ));
            }
            if targets.iter().any(|t| t.trim().is_empty()) {
                return Err(Error::Configuration(format!(
                    "backends.targets.{} contains an empty target",
                    model
                )));
            }
        }

        Ok(())
    }
}

/// Identifier authority for created instances.
///
/// `self` (any case) keeps locally generated identifiers; any other value names
/// the remote target whose identifiers win.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TargetMode {
    #[default]
    SelfTarget,
    Remote(String),
}

impl TargetMode {
    pub fn is_self(&self) -> bool {
        matches!(self, TargetMode::SelfTarget)
    }
}

impl From<String> for TargetMode {
    fn from(value: String) -> Self {
        if value.trim().eq_ignore_ascii_case("self") {
            TargetMode::SelfTarget
        } else {
            TargetMode::Remote(value)
        }
    }
}

impl From<&str> for TargetMode {
    fn from(value: &str) -> Self {
        TargetMode::from(value.to_string())
    }
}

impl From<TargetMode> for String {
    fn from(value: TargetMode) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TargetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetMode::SelfTarget => f.write_str("SELF"),
            TargetMode::Remote(name) => f.write_str(name),
        }
    }
}

/// How handler failures during fan-out are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// First failure aborts the remaining handlers and propagates
    FailFast,
    /// Every failure is contained and only reported
    Isolate,
    /// A primary failure propagates; secondary failures are reported
    #[default]
    PrimaryFatal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the remote dispatch server (e.g. "https://mds.example.org/api")
    pub base_url: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub file_enabled: bool,
    pub file_directory: String,
    pub file_prefix: String,
    /// daily | hourly | minutely | never
    pub file_rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_enabled: false,
            file_directory: "logs".to_string(),
            file_prefix: "mds-dispatch".to_string(),
            file_rotation: "daily".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        const ROTATIONS: [&str; 4] = ["daily", "hourly", "minutely", "never"];

        if !LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            return Err(Error::Configuration(format!(
                "logging.level must be one of {:?}, got '{}'",
                LEVELS, self.level
            )));
        }
        if self.file_enabled && !ROTATIONS.contains(&self.file_rotation.as_str()) {
            return Err(Error::Configuration(format!(
                "logging.file_rotation must be one of {:?}, got '{}'",
                ROTATIONS, self.file_rotation
            )));
        }
        Ok(())
    }
}
