//! Configuration loader for YAML files and environment overrides
//!
//! A YAML file is optional. Environment variables are applied on top of it
//! and always win, then the merged configuration is validated.

use super::SandboxConfig;
use crate::errors::ConfigError;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from an optional YAML file plus the process environment.
    pub async fn load(path: Option<&Path>) -> Result<SandboxConfig, ConfigError> {
        let mut config = match path {
            Some(path) => Self::read_file(path).await?,
            None => SandboxConfig::default(),
        };
        Self::apply_overrides(&mut config, |key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an arbitrary key lookup, starting from defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<SandboxConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = SandboxConfig::default();
        Self::apply_overrides(&mut config, lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document. Missing keys keep their defaults.
    pub fn parse_yaml(content: &str) -> Result<SandboxConfig, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    async fn read_file(path: &Path) -> Result<SandboxConfig, ConfigError> {
        let content = fs::read_to_string(path).await.map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        log::info!("Loaded configuration file {}", path.display());
        Self::parse_yaml(&content)
    }

    /// Apply environment style overrides to `config`.
    pub fn apply_overrides<F>(config: &mut SandboxConfig, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = get("DOCKER_SOCKET_PATH").or_else(|| get("DOCKER_HOST")) {
            config.docker.socket_path = Some(value);
        }
        if let Some(value) = get("DOCKER_CLIENT_TIMEOUT") {
            config.docker.client_timeout_secs = parse_value("DOCKER_CLIENT_TIMEOUT", &value)?;
        }
        if let Some(value) = get("DOCKER_CLIENT_MAX_RETRIES") {
            config.docker.max_retries = parse_value("DOCKER_CLIENT_MAX_RETRIES", &value)?;
        }
        if let Some(value) = get("DOCKER_CLIENT_RETRY_DELAY") {
            config.docker.retry_delay_secs = parse_value("DOCKER_CLIENT_RETRY_DELAY", &value)?;
        }

        if let Some(value) = get("EXECUTOR_IMAGE_NAME") {
            config.executor.image_name = value;
        }
        if let Some(value) = get("EXECUTOR_DOCKERFILE_PATH") {
            config.executor.dockerfile_path = value;
        }
        if let Some(value) = get("EXECUTOR_BUILD_CONTEXT") {
            config.executor.build_context = PathBuf::from(value);
        }

        if let Some(value) = get("CONTAINER_MEMORY_LIMIT") {
            config.container.memory_limit = value;
        }
        if let Some(value) = get("CONTAINER_CPU_QUOTA") {
            config.container.cpu_quota = parse_value("CONTAINER_CPU_QUOTA", &value)?;
        }
        if let Some(value) = get("CONTAINER_TIMEOUT") {
            config.container.default_timeout_secs = parse_value("CONTAINER_TIMEOUT", &value)?;
        }
        if let Some(value) = get("CONTAINER_USER") {
            config.container.user = value;
        }
        if let Some(value) = get("NETWORK_DISABLED") {
            config.container.network_disabled = parse_bool("NETWORK_DISABLED", &value)?;
        }

        if let Some(value) = get("ALLOWED_WORK_DIR_ROOT") {
            config.workspace.allowed_work_dir_root = value;
        }
        if let Some(value) = get("STAGING_ROOT") {
            config.workspace.staging_root = Some(PathBuf::from(value));
        }
        if let Some(value) = get("DOWNLOAD_TIMEOUT") {
            config.workspace.download_timeout_secs = parse_value("DOWNLOAD_TIMEOUT", &value)?;
        }

        if let Some(value) = get("API_HOST") {
            config.api.host = value;
        }
        if let Some(value) = get("API_PORT") {
            config.api.port = parse_value("API_PORT", &value)?;
        }
        if let Some(value) = get("LOG_LEVEL") {
            config.log_level = value.to_lowercase();
        }

        Ok(())
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, format!("'{}': {}", value, e)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(
            key,
            format!("expected a boolean, got '{}'", value),
        )),
    }
}
