use std::sync::Arc;
use tracing::info;

use crate::config::{AppConfig, ConfigError};

/// Name given to the app when none is supplied
pub const DEFAULT_APP_NAME: &str = "[DEFAULT]";

/// An initialized application instance.
///
/// Construct once at startup and hand clones to whatever needs it; there is
/// no process-wide instance.
#[derive(Debug, Clone)]
pub struct App {
    name: String,
    config: Arc<AppConfig>,
}

impl App {
    /// Validate `config` and create the default app
    pub fn initialize(config: AppConfig) -> Result<Self, ConfigError> {
        Self::initialize_named(config, DEFAULT_APP_NAME)
    }

    pub fn initialize_named(
        config: AppConfig,
        name: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::InvalidAppName(name));
        }

        config.validate()?;

        info!(
            app = %name,
            project_id = %config.project_id,
            auth_domain = %config.auth_domain,
            "Initialized app"
        );

        Ok(Self {
            name,
            config: Arc::new(config),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}
