//! Configuration Loader
//!
//! Environment-aware configuration loading built on the `config` crate.
//! Handles config file discovery, environment detection and layering.
//!
//! Layers, lowest priority first:
//!
//! 1. serde defaults on [`FileBatchConfig`]
//! 2. `<config_dir>/filebatch.{toml,yaml,yml,json}` (optional)
//! 3. `<config_dir>/filebatch.<environment>.{toml,yaml,yml,json}` (optional)
//! 4. `FILEBATCH__<SECTION>__<KEY>` environment variables

use super::error::{ConfigResult, ConfigurationError};
use super::FileBatchConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const CONFIG_BASENAME: &str = "filebatch";
const ENV_PREFIX: &str = "FILEBATCH";
const ENV_SEPARATOR: &str = "__";

/// Loaded configuration together with where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: FileBatchConfig,
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

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);
        let config = Self::load_layers(&config_directory, None, environment, None)?;
        Ok(Arc::new(Self::finish(config, environment, config_directory)?))
    }

    /// Load a single explicit configuration file (which must exist), still
    /// honouring environment variable overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigurationError::config_file_not_found(path));
        }
        let environment = Self::detect_environment();
        let config_directory = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let config = Self::load_layers(&config_directory, Some(path), &environment, None)?;
        Ok(Arc::new(Self::finish(config, &environment, config_directory)?))
    }

    /// Load with an explicit set of `FILEBATCH__*` variables instead of the process environment
    pub fn load_with_env_vars(
        config_dir: PathBuf,
        environment: &str,
        env_vars: config::Map<String, String>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config = Self::load_layers(&config_dir, None, environment, Some(env_vars))?;
        Ok(Arc::new(Self::finish(config, environment, config_dir)?))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &FileBatchConfig {
        &self.config
    }

    /// Get the detected or requested environment name
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the directory configuration files were searched in
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn finish(
        config: FileBatchConfig,
        environment: &str,
        config_directory: PathBuf,
    ) -> ConfigResult<ConfigManager> {
        config.validate()?;

        info!(
            environment = %environment,
            watch_directory = %config.source.watch_directory.display(),
            file_pattern = %config.source.file_pattern,
            count_threshold = config.aggregator.count_threshold,
            group_timeout_ms = config.aggregator.group_timeout_ms,
            "Configuration loaded successfully"
        );

        Ok(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        })
    }

    fn load_layers(
        config_directory: &Path,
        explicit_file: Option<&Path>,
        environment: &str,
        env_vars: Option<config::Map<String, String>>,
    ) -> ConfigResult<FileBatchConfig> {
        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let base = config_directory.join(CONFIG_BASENAME);
        let overrides = config_directory.join(format!("{CONFIG_BASENAME}.{environment}"));

        let mut builder = Config::builder();
        builder = match explicit_file {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(&base.to_string_lossy()).required(false)),
        };
        builder = builder
            .add_source(File::with_name(&overrides.to_string_lossy()).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .source(env_vars),
            );

        let merged = builder.build().map_err(|e| {
            ConfigurationError::load_error(config_directory.display().to_string(), e)
        })?;

        merged
            .try_deserialize::<FileBatchConfig>()
            .map_err(ConfigurationError::deserialize_error)
    }

    fn detect_environment() -> String {
        env::var("FILEBATCH_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("FILEBATCH_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}
