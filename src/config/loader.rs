//! Configuration Loader
//!
//! Environment-aware loading built on the `config` crate. Defaults are always the
//! bottom layer, so every file and environment variable is an override.

use super::error::{ConfigResult, ConfigurationError};
use super::ShipyardConfig;
use crate::constants::system;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Base file name inside the configuration directory
const BASE_FILE_STEM: &str = "shipyard";

/// Prefix for environment variable overrides (`SHIPYARD__MONITOR__POLL_INTERVAL_SECONDS`)
const ENV_PREFIX: &str = "SHIPYARD";
const ENV_SEPARATOR: &str = "__";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: ShipyardConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with an explicit environment.
    /// Useful for tests that must not touch process-wide variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = %environment,
            config_directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::build_layers(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            state_dir = %config.registry.state_dir.display(),
            poll_interval_seconds = config.monitor.poll_interval_seconds,
            stall_threshold_seconds = config.monitor.stall_threshold_seconds,
            max_attempts = config.notifier.max_attempts,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration (tests, embedding hosts)
    pub fn from_config(config: ShipyardConfig, environment: &str) -> ConfigResult<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: Self::default_config_directory(),
        }))
    }

    pub fn config(&self) -> &ShipyardConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn build_layers(config_directory: &Path, environment: &str) -> ConfigResult<ShipyardConfig> {
        let defaults = config::Config::try_from(&ShipyardConfig::default())
            .map_err(|e| ConfigurationError::build_error(environment, e))?;

        let base_file = config_directory.join(format!("{BASE_FILE_STEM}.toml"));
        let env_file = config_directory.join(format!("{BASE_FILE_STEM}.{environment}.toml"));

        for file in [&base_file, &env_file] {
            if file.exists() {
                debug!(file = %file.display(), "Applying configuration file");
            }
        }

        let built = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::from(base_file.clone()).required(false))
            .add_source(config::File::from(env_file).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| match e {
                config::ConfigError::FileParse { uri, cause } => ConfigurationError::InvalidFile {
                    file_path: uri.unwrap_or_else(|| base_file.display().to_string()),
                    error: cause.to_string(),
                },
                other => ConfigurationError::build_error(environment, other),
            })?;

        built
            .try_deserialize::<ShipyardConfig>()
            .map_err(|e| ConfigurationError::build_error(environment, e))
    }

    /// Detect the deployment environment of this process
    pub fn detect_environment() -> String {
        env::var("SHIPYARD_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| system::DEFAULT_ENVIRONMENT.to_string())
            .to_lowercase()
    }

    fn default_config_directory() -> PathBuf {
        env::var("SHIPYARD_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}
