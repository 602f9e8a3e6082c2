//! Process-wide configuration
//!
//! All settings are fixed at start-up: callers of the execution API only
//! choose the code, timeout, working directory and reference files. Resource
//! limits and the security profile of every container come from here.

pub mod loader;


pub use loader::ConfigLoader;

use crate::errors::ConfigError;
use crate::runtime::ResourceProfile;
use crate::validation::{RequestPolicy, MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// CFS period used together with [`ContainerConfig::cpu_quota`].
pub const CPU_PERIOD_MICROS: i64 = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub docker: DockerConfig,
    pub executor: ExecutorConfig,
    pub container: ContainerConfig,
    pub workspace: WorkspaceConfig,
    pub api: ApiConfig,
    pub log_level: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            docker: DockerConfig::default(),
            executor: ExecutorConfig::default(),
            container: ContainerConfig::default(),
            workspace: WorkspaceConfig::default(),
            api: ApiConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Connection settings for the Docker daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Unix socket path or `tcp://` endpoint. Local defaults when unset.
    pub socket_path: Option<String>,
    pub client_timeout_secs: u64,
    /// Number of connection attempts before giving up.
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            client_timeout_secs: 60,
            max_retries: 3,
            retry_delay_secs: 2,
        }
    }
}

impl DockerConfig {
    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// The image every execution unit is created from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub image_name: String,
    /// Dockerfile path relative to `build_context`.
    pub dockerfile_path: String,
    pub build_context: PathBuf,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            image_name: "sandbox-executor".to_string(),
            dockerfile_path: "Dockerfile.executor".to_string(),
            build_context: PathBuf::from("docker"),
        }
    }
}

/// Resource ceiling and security profile applied to every container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Docker style size, e.g. `128m` or `1g`.
    pub memory_limit: String,
    /// Microseconds of CPU time per [`CPU_PERIOD_MICROS`].
    pub cpu_quota: i64,
    /// Timeout applied when a request does not specify one.
    pub default_timeout_secs: u64,
    pub user: String,
    pub network_disabled: bool,
    pub security_opts: Vec<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            memory_limit: "128m".to_string(),
            cpu_quota: 50_000,
            default_timeout_secs: 30,
            user: "sandbox".to_string(),
            network_disabled: true,
            security_opts: vec!["no-new-privileges".to_string()],
        }
    }
}

impl ContainerConfig {
    pub fn resource_profile(&self) -> Result<ResourceProfile, ConfigError> {
        Ok(ResourceProfile {
            memory_bytes: parse_memory_limit(&self.memory_limit)?,
            cpu_quota: self.cpu_quota,
            cpu_period: CPU_PERIOD_MICROS,
            network_disabled: self.network_disabled,
            security_opts: self.security_opts.clone(),
            user: self.user.clone(),
        })
    }
}

/// Host-side staging of reference files and the allowed in-container root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub allowed_work_dir_root: String,
    /// Parent of the per-request staging directories. System temp dir when unset.
    pub staging_root: Option<PathBuf>,
    pub download_timeout_secs: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            allowed_work_dir_root: "/data".to_string(),
            staging_root: None,
            download_timeout_secs: 30,
        }
    }
}

impl WorkspaceConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 16009,
        }
    }
}

impl ApiConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl SandboxConfig {
    pub fn request_policy(&self) -> RequestPolicy {
        RequestPolicy {
            allowed_root: self.workspace.allowed_work_dir_root.clone(),
            default_timeout_secs: self.container.default_timeout_secs,
        }
    }

    /// Check the configuration as a whole. Called once at start-up.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.docker.max_retries == 0 {
            return Err(ConfigError::invalid(
                "DOCKER_CLIENT_MAX_RETRIES",
                "at least one connection attempt is required",
            ));
        }
        if self.docker.client_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "DOCKER_CLIENT_TIMEOUT",
                "must be greater than zero",
            ));
        }
        if self.executor.image_name.trim().is_empty() {
            return Err(ConfigError::invalid("EXECUTOR_IMAGE_NAME", "must not be empty"));
        }
        parse_memory_limit(&self.container.memory_limit)?;
        // Docker rejects quotas below 1ms.
        if self.container.cpu_quota < 1_000 {
            return Err(ConfigError::invalid(
                "CONTAINER_CPU_QUOTA",
                format!("must be at least 1000, got {}", self.container.cpu_quota),
            ));
        }
        let default_timeout = self.container.default_timeout_secs as i64;
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&default_timeout) {
            return Err(ConfigError::invalid(
                "CONTAINER_TIMEOUT",
                format!(
                    "must be between {} and {} seconds",
                    MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS
                ),
            ));
        }
        if self.container.user.trim().is_empty() {
            return Err(ConfigError::invalid("CONTAINER_USER", "must not be empty"));
        }
        if !self.workspace.allowed_work_dir_root.starts_with('/') {
            return Err(ConfigError::invalid(
                "ALLOWED_WORK_DIR_ROOT",
                "must be an absolute path",
            ));
        }
        if self.workspace.download_timeout_secs == 0 {
            return Err(ConfigError::invalid("DOWNLOAD_TIMEOUT", "must be greater than zero"));
        }
        if self.log_level.parse::<log::LevelFilter>().is_err() {
            return Err(ConfigError::invalid(
                "LOG_LEVEL",
                format!("unknown level '{}'", self.log_level),
            ));
        }
        Ok(())
    }
}

/// Parse a Docker style memory size (`512k`, `128m`, `1g`, `1048576`) into bytes.
pub fn parse_memory_limit(value: &str) -> Result<i64, ConfigError> {
    let invalid = |message: &str| ConfigError::invalid("CONTAINER_MEMORY_LIMIT", message);

    let trimmed = value.trim().to_ascii_lowercase();
    let trimmed = trimmed.strip_suffix('b').unwrap_or(&trimmed);
    let (digits, multiplier) = match trimmed.chars().last() {
        Some('k') => (&trimmed[..trimmed.len() - 1], 1024_i64),
        Some('m') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some('g') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        Some(c) if c.is_ascii_digit() => (trimmed, 1),
        _ => return Err(invalid(&format!("cannot parse '{}'", value))),
    };

    let amount: i64 = digits
        .parse()
        .map_err(|_| invalid(&format!("cannot parse '{}'", value)))?;
    if amount <= 0 {
        return Err(invalid("must be greater than zero"));
    }
    amount
        .checked_mul(multiplier)
        .ok_or_else(|| invalid(&format!("'{}' is too large", value)))
}
