//! Container runtime abstraction
//!
//! The orchestrator only talks to the runtime through [`RuntimeClient`], so
//! the Docker implementation can be swapped for an in-memory one in tests.
//! Implementations must be safe to share between concurrently running
//! requests.

use crate::errors::RuntimeError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

pub mod docker;

pub use docker::DockerRuntime;

/// Length of the container id prefix reported to callers.
pub const SHORT_ID_LEN: usize = 12;

/// Resource ceiling and security settings applied to a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceProfile {
    pub memory_bytes: i64,
    pub cpu_quota: i64,
    pub cpu_period: i64,
    pub network_disabled: bool,
    pub security_opts: Vec<String>,
    /// Identity the command runs as inside the unit.
    pub user: String,
}

/// A host directory mounted into the unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBinding {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl VolumeBinding {
    pub fn read_write(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    /// Docker `Binds` notation, `host:container:mode`.
    pub fn to_bind_string(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.container_path,
            mode
        )
    }
}

/// Everything needed to create one execution unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: String,
    pub env: Vec<String>,
    pub profile: ResourceProfile,
    pub binds: Vec<VolumeBinding>,
}

/// A created unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitHandle {
    pub id: String,
    pub name: String,
}

impl UnitHandle {
    pub fn short_id(&self) -> String {
        self.id.chars().take(SHORT_ID_LEN).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Exited(i64),
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    /// Nothing by that name existed.
    NotFound,
}

/// Directory and Dockerfile used to build the executor image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    pub context_dir: PathBuf,
    /// Dockerfile path relative to `context_dir`.
    pub dockerfile: String,
}

#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Whether the runtime currently answers requests.
    async fn is_available(&self) -> bool;

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    async fn build_image(&self, image: &str, context: &BuildContext) -> Result<(), RuntimeError>;

    /// Create a unit without starting it.
    async fn create(&self, spec: &UnitSpec) -> Result<UnitHandle, RuntimeError>;

    async fn start(&self, unit: &UnitHandle) -> Result<(), RuntimeError>;

    /// Create and start a unit.
    async fn run(&self, spec: &UnitSpec) -> Result<UnitHandle, RuntimeError> {
        let unit = self.create(spec).await?;
        self.start(&unit).await?;
        Ok(unit)
    }

    /// Wait for the unit to exit, at most `timeout`. The unit keeps running on expiry.
    async fn wait(&self, unit: &UnitHandle, timeout: Duration) -> Result<WaitStatus, RuntimeError>;

    /// Combined stdout and stderr produced so far.
    async fn logs(&self, unit: &UnitHandle) -> Result<Vec<u8>, RuntimeError>;

    /// Extract a tar archive into `target_path` inside the unit.
    async fn copy_in(
        &self,
        unit: &UnitHandle,
        target_path: &str,
        archive: Vec<u8>,
    ) -> Result<(), RuntimeError>;

    /// Read `source_path` from the unit as a tar archive.
    async fn copy_out(&self, unit: &UnitHandle, source_path: &str) -> Result<Vec<u8>, RuntimeError>;

    /// Remove a unit by name.
    async fn remove(&self, name: &str, force: bool) -> Result<Removal, RuntimeError>;
}

/// Make sure `image` is present, building it from `context` when it is not.
///
/// Returns `true` when a build was performed.
pub async fn ensure_image(
    runtime: &dyn RuntimeClient,
    image: &str,
    context: &BuildContext,
) -> Result<bool, RuntimeError> {
    if runtime.image_exists(image).await? {
        log::info!("Executor image '{}' already present", image);
        return Ok(false);
    }

    log::info!(
        "Executor image '{}' not found, building from {} ({})",
        image,
        context.context_dir.display(),
        context.dockerfile
    );
    runtime.build_image(image, context).await?;
    log::info!("Executor image '{}' built", image);
    Ok(true)
}
