//! Execution orchestration
//!
//! [`ExecutionOrchestrator`] drives one request from a validated
//! [`ExecutionRequest`] to an [`ExecutionReport`]:
//! stage reference files, create and run the unit, wait, capture output,
//! extract artifacts and finally release everything through a
//! [`CleanupGuard`]. Requests share nothing but the runtime client.

use crate::archive;
use crate::cleaner::{CleanupGuard, ResourceCleaner};
use crate::config::SandboxConfig;
use crate::errors::{ConfigError, SandboxError};
use crate::extractor::ArtifactExtractor;
use crate::outcome::{ExecutionOutcome, ExecutionReport};
use crate::runtime::{
    ResourceProfile, RuntimeClient, UnitHandle, UnitSpec, VolumeBinding, WaitStatus,
};
use crate::staging::FileStager;
use crate::validation::{ExecutionRequest, RequestPolicy};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Prefix shared by every unit name.
pub const UNIT_NAME_PREFIX: &str = "sandbox";

/// Interpreter the code is handed to as a single `-c` argument.
const INTERPRETER: &str = "python";

/// Keeps output flushed line by line so a killed run still has its logs.
const UNIT_ENV: &[&str] = &["PYTHONUNBUFFERED=1"];

pub fn generate_unit_name() -> String {
    format!(
        "{}-{}",
        UNIT_NAME_PREFIX,
        &Uuid::new_v4().simple().to_string()[..8]
    )
}

pub struct ExecutionOrchestrator {
    runtime: Arc<dyn RuntimeClient>,
    stager: FileStager,
    extractor: ArtifactExtractor,
    cleaner: ResourceCleaner,
    image: String,
    profile: ResourceProfile,
    staging_root: Option<PathBuf>,
    policy: RequestPolicy,
}

impl ExecutionOrchestrator {
    pub fn new(runtime: Arc<dyn RuntimeClient>, config: &SandboxConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            stager: FileStager::new(config.workspace.download_timeout()),
            extractor: ArtifactExtractor::new(runtime.clone()),
            cleaner: ResourceCleaner::new(runtime.clone()),
            image: config.executor.image_name.clone(),
            profile: config.container.resource_profile()?,
            staging_root: config.workspace.staging_root.clone(),
            policy: config.request_policy(),
            runtime,
        })
    }

    pub fn request_policy(&self) -> &RequestPolicy {
        &self.policy
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Run one validated request end to end.
    ///
    /// Only staging failures and an unusable runtime are returned as errors.
    /// Everything that happens once the unit exists is reported through the
    /// outcome. The unit and staging directory are gone when this returns.
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionReport, SandboxError> {
        let unit_name = generate_unit_name();
        let mut guard = self.cleaner.guard();

        log::info!(
            "Executing request as {} (timeout {}s, work_dir {}, {} ref file(s))",
            unit_name,
            request.timeout().as_secs(),
            request.work_dir(),
            request.ref_files().len()
        );

        let result = self.stage_and_run(request, &unit_name, &mut guard).await;
        guard.finish().await;

        match &result {
            Ok(report) => log::info!(
                "Request {} finished: success={} exit_code={} artifacts={}",
                unit_name,
                report.outcome.success(),
                report.outcome.exit_code(),
                report.artifacts.len()
            ),
            Err(e) => log::error!("Request {} failed: {}", unit_name, e),
        }
        result
    }

    async fn stage_and_run(
        &self,
        request: &ExecutionRequest,
        unit_name: &str,
        guard: &mut CleanupGuard,
    ) -> Result<ExecutionReport, SandboxError> {
        // Always mounted, so `work_dir` exists and is writable by the unit user.
        let staging_dir = self.create_staging_dir(unit_name)?;
        guard.track_staging_dir(&staging_dir);
        if !request.ref_files().is_empty() {
            self.stager.stage(request.ref_files(), &staging_dir).await?;
        }

        self.run_unit(
            unit_name,
            request.code(),
            request.timeout(),
            request.work_dir(),
            Some(&staging_dir),
            guard,
        )
        .await
    }

    /// Run code in a fresh unit and remove the unit afterwards.
    ///
    /// `staging_dir` is mounted at `work_dir` but left in place; it belongs to the caller.
    pub async fn run(
        &self,
        code: &str,
        timeout: Duration,
        work_dir: &str,
        staging_dir: Option<&Path>,
    ) -> Result<ExecutionReport, SandboxError> {
        let unit_name = generate_unit_name();
        let mut guard = self.cleaner.guard();
        let result = self
            .run_unit(&unit_name, code, timeout, work_dir, staging_dir, &mut guard)
            .await;
        guard.finish().await;
        result
    }

    fn create_staging_dir(&self, unit_name: &str) -> Result<PathBuf, SandboxError> {
        let prefix = format!("{}_", unit_name.replace('-', "_"));
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix).keep(true);
        let dir = match &self.staging_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| SandboxError::Internal(format!("could not create staging directory: {}", e)))?;
        let path = dir.path().to_path_buf();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(archive::STAGED_DIR_MODE))
            {
                let _ = std::fs::remove_dir_all(&path);
                return Err(SandboxError::Internal(format!(
                    "could not open up staging directory {}: {}",
                    path.display(),
                    e
                )));
            }
        }

        log::debug!("Created staging directory {}", path.display());
        Ok(path)
    }

    async fn run_unit(
        &self,
        unit_name: &str,
        code: &str,
        timeout: Duration,
        work_dir: &str,
        staging_dir: Option<&Path>,
        guard: &mut CleanupGuard,
    ) -> Result<ExecutionReport, SandboxError> {
        let spec = UnitSpec {
            name: unit_name.to_string(),
            image: self.image.clone(),
            command: vec![INTERPRETER.to_string(), "-c".to_string(), code.to_string()],
            working_dir: work_dir.to_string(),
            env: UNIT_ENV.iter().map(|v| v.to_string()).collect(),
            profile: self.profile.clone(),
            binds: staging_dir
                .map(|dir| vec![VolumeBinding::read_write(dir, work_dir)])
                .unwrap_or_default(),
        };

        // Tracked before creation so a half-created unit is still removed.
        guard.track_unit(unit_name);
        let unit = self.runtime.create(&spec).await.map_err(|e| {
            SandboxError::RuntimeUnavailable(format!("failed to create container: {}", e))
        })?;
        log::debug!("Created container {} ({})", unit.name, unit.short_id());

        if let Some(dir) = staging_dir.filter(|dir| has_entries(dir)) {
            self.copy_staged_files(&unit, dir, work_dir).await;
        }

        self.runtime.start(&unit).await.map_err(|e| {
            SandboxError::RuntimeUnavailable(format!("failed to start container: {}", e))
        })?;

        let waited = self.runtime.wait(&unit, timeout).await;

        let output = match self.runtime.logs(&unit).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                log::warn!("Could not read logs of container {}: {}", unit.short_id(), e);
                String::new()
            }
        };

        let outcome = match waited {
            Ok(WaitStatus::Exited(code)) => ExecutionOutcome::from_exit(code, output),
            Ok(WaitStatus::TimedOut) => {
                log::warn!(
                    "Container {} exceeded its {}s timeout",
                    unit.short_id(),
                    timeout.as_secs()
                );
                ExecutionOutcome::TimeoutFailure {
                    partial_output: output,
                }
            }
            Err(e) => {
                log::error!("Waiting on container {} failed: {}", unit.short_id(), e);
                ExecutionOutcome::InfrastructureError {
                    reason: e.to_string(),
                    output,
                }
            }
        };

        let artifacts = self.extractor.extract(&unit, work_dir).await;

        Ok(ExecutionReport {
            unit_id: unit.short_id(),
            outcome,
            artifacts,
        })
    }

    async fn copy_staged_files(&self, unit: &UnitHandle, dir: &Path, work_dir: &str) {
        let source = dir.to_path_buf();
        let packed = tokio::task::spawn_blocking(move || archive::pack_directory(&source)).await;
        let tarball = match packed {
            Ok(Ok(tarball)) => tarball,
            Ok(Err(e)) => {
                log::warn!("Could not pack staging directory {}: {}", dir.display(), e);
                return;
            }
            Err(e) => {
                log::warn!("Packing task for {} failed: {}", dir.display(), e);
                return;
            }
        };

        if let Err(e) = self.runtime.copy_in(unit, work_dir, tarball).await {
            log::warn!(
                "Copying staged files into container {} failed, relying on the bind mount: {}",
                unit.short_id(),
                e
            );
        }
    }
}

fn has_entries(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
