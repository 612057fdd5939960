// Application Configuration
// Connection parameters for the hosted identity service

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Environment variable prefix, e.g. `MAPPEDOUT_PROJECT_ID`
pub const ENV_PREFIX: &str = "MAPPEDOUT_";

/// Default config file looked up by the binary
pub const DEFAULT_CONFIG_FILE: &str = "mappedout.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid app name: {0:?}")]
    InvalidAppName(String),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),
}

/// Identity service connection parameters.
///
/// Every value is passed verbatim to the identity service; nothing here is
/// interpreted beyond checking that required values are present.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub auth_domain: String,

    #[serde(default)]
    pub project_id: String,

    #[serde(default)]
    pub storage_bucket: String,

    #[serde(default)]
    pub messaging_sender_id: String,

    #[serde(default)]
    pub app_id: String,

    /// Analytics stream; optional for auth-only deployments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_id: Option<String>,
}

impl AppConfig {
    /// Layered sources: TOML file first, then `MAPPEDOUT_*` environment variables.
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(env_layer())
    }

    /// Load from `path` (missing file is fine) plus environment, then validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: AppConfig = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        let config: AppConfig = Figment::new().merge(env_layer()).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Presence check only; reports the first missing key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("api_key", &self.api_key),
            ("auth_domain", &self.auth_domain),
            ("project_id", &self.project_id),
            ("storage_bucket", &self.storage_bucket),
            ("messaging_sender_id", &self.messaging_sender_id),
            ("app_id", &self.app_id),
        ];

        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(key));
            }
        }

        if let Some(measurement_id) = &self.measurement_id {
            if measurement_id.trim().is_empty() {
                return Err(ConfigError::Missing("measurement_id"));
            }
        }

        Ok(())
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &"<redacted>")
            .field("auth_domain", &self.auth_domain)
            .field("project_id", &self.project_id)
            .field("storage_bucket", &self.storage_bucket)
            .field("messaging_sender_id", &self.messaging_sender_id)
            .field("app_id", &self.app_id)
            .field("measurement_id", &self.measurement_id)
            .finish()
    }
}

/// `MAPPEDOUT_*` variables as raw strings.
///
/// `Env` on its own parses values (`0123` becomes a number, `true` a bool);
/// every value here has to reach the identity service exactly as written.
fn env_layer() -> Serialized<BTreeMap<String, String>> {
    let vars = Env::prefixed(ENV_PREFIX)
        .iter()
        .map(|(key, value)| (key.as_str().to_string(), value))
        .collect();
    Serialized::defaults(vars)
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        api_key: "test-api-key".to_string(),
        auth_domain: "mapped-out-test.firebaseapp.com".to_string(),
        project_id: "mapped-out-test".to_string(),
        storage_bucket: "mapped-out-test.appspot.com".to_string(),
        messaging_sender_id: "1234567890".to_string(),
        app_id: "1:1234567890:web:abcdef".to_string(),
        measurement_id: Some("G-TEST".to_string()),
    }
}
