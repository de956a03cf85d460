//! Harness configuration loaded from `vault-harness.yml`.
//!
//! Every field has a default, so an empty (or absent) file yields a config
//! pointing at a local deployment. A few connection settings can be
//! overridden from the environment:
//!
//! | Variable                          | Field                         |
//! |-----------------------------------|-------------------------------|
//! | `VAULT_HARNESS_BASE_URL`          | `deployment.base_url`         |
//! | `VAULT_HARNESS_PROVISIONING_URL`  | `deployment.provisioning_url` |
//! | `VAULT_HARNESS_WEBDRIVER_URL`     | `webdriver.url`               |

use crate::backend::BackendKind;
use crate::environment::DatasetTemplate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "vault-harness.yml";

/// Parameter that turns the pre-flight login check off.
pub const LOGIN_SMOKE_PARAMETER: &str = "login_smoke_enabled";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub deployment: DeploymentConfig,
    pub webdriver: WebDriverConfig,
    pub backend: BackendConfig,
    pub execution: ExecutionConfig,
    pub smoke: SmokeConfig,
    pub diagnostics: DiagnosticsConfig,
    /// Suite-wide named parameters.
    pub parameters: BTreeMap<String, serde_yaml::Value>,
    /// Per-fixture parameter overrides, keyed by fixture id.
    pub fixtures: BTreeMap<String, FixtureOverrides>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Root URL of the web application.
    pub base_url: String,
    /// Root URL of the test provisioning API.
    pub provisioning_url: String,
    pub request_timeout_secs: u64,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            provisioning_url: "http://localhost:8080/api/test".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebDriverConfig {
    pub url: String,
    /// `chrome` or `firefox`.
    pub browser: String,
    pub headless: bool,
    pub command_timeout_secs: u64,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:4444".to_string(),
            browser: "chrome".to_string(),
            headless: true,
            command_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub template: DatasetTemplate,
    /// Environments the backend can create at the same time.
    pub max_concurrent_provisions: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            template: DatasetTemplate::default(),
            max_concurrent_provisions: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub test_timeout_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            test_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmokeConfig {
    pub attempts: u32,
}

impl Default for SmokeConfig {
    fn default() -> Self {
        Self { attempts: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub dir: PathBuf,
    pub reports_dir: PathBuf,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".vault-harness/diagnostics"),
            reports_dir: PathBuf::from("reports"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureOverrides {
    pub parameters: BTreeMap<String, serde_yaml::Value>,
}

impl HarnessConfig {
    /// Parses a YAML document. Environment overrides are not applied.
    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_yaml(&content)
    }

    /// Loads `path`, or `vault-harness.yml` if present, or defaults; then
    /// applies environment overrides and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Applies `VAULT_HARNESS_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let targets = [
            ("VAULT_HARNESS_BASE_URL", &mut self.deployment.base_url),
            ("VAULT_HARNESS_PROVISIONING_URL", &mut self.deployment.provisioning_url),
            ("VAULT_HARNESS_WEBDRIVER_URL", &mut self.webdriver.url),
        ];
        for (key, field) in targets {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                debug!(key, value = %value, "Applying environment override");
                *field = value;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let urls = [
            ("deployment.base_url", &self.deployment.base_url),
            ("deployment.provisioning_url", &self.deployment.provisioning_url),
            ("webdriver.url", &self.webdriver.url),
        ];
        for (name, url) in urls {
            if url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{name} must not be empty")));
            }
        }
        if self.backend.max_concurrent_provisions == 0 {
            return Err(ConfigError::Invalid(
                "backend.max_concurrent_provisions must be at least 1".to_string(),
            ));
        }
        if self.smoke.attempts == 0 {
            return Err(ConfigError::Invalid("smoke.attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.execution.test_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.deployment.request_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.webdriver.command_timeout_secs)
    }

    pub fn parameter_resolver(&self) -> ParameterResolver {
        ParameterResolver {
            defaults: self.parameters.clone(),
            fixtures: self
                .fixtures
                .iter()
                .map(|(id, overrides)| (id.clone(), overrides.parameters.clone()))
                .collect(),
        }
    }
}

/// Resolves named parameters for a fixture: suite defaults overlaid with
/// the fixture's own overrides.
#[derive(Debug, Clone, Default)]
pub struct ParameterResolver {
    defaults: BTreeMap<String, serde_yaml::Value>,
    fixtures: BTreeMap<String, BTreeMap<String, serde_yaml::Value>>,
}

impl ParameterResolver {
    pub fn resolve(&self, fixture_id: &str) -> FixtureParameters {
        let mut values = self.defaults.clone();
        if let Some(overrides) = self.fixtures.get(fixture_id) {
            values.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        FixtureParameters {
            fixture_id: fixture_id.to_string(),
            values,
        }
    }

    /// Suite-wide parameters only, without any fixture overrides.
    pub fn suite(&self) -> FixtureParameters {
        FixtureParameters {
            fixture_id: String::new(),
            values: self.defaults.clone(),
        }
    }
}

/// Immutable parameter set of one fixture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixtureParameters {
    fixture_id: String,
    values: BTreeMap<String, serde_yaml::Value>,
}

impl FixtureParameters {
    pub fn fixture_id(&self) -> &str {
        &self.fixture_id
    }

    /// Returns a scalar parameter rendered as a string.
    pub fn get(&self, name: &str) -> Option<String> {
        match self.values.get(name)? {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Accepts YAML booleans and the strings `true`/`false`/`yes`/`no`/`1`/`0`.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name)? {
            serde_yaml::Value::Bool(b) => Some(*b),
            serde_yaml::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            serde_yaml::Value::Number(n) => n.as_u64().map(|n| n != 0),
            _ => None,
        }
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        match self.values.get(name)? {
            serde_yaml::Value::Number(n) => n.as_u64(),
            serde_yaml::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn login_smoke_enabled(&self) -> bool {
        self.get_bool(LOGIN_SMOKE_PARAMETER).unwrap_or(true)
    }
}
