// src/runtime/docker.rs
use async_trait::async_trait;
use bollard::container::LogOutput; // For LogOutput::StdOut, LogOutput::StdErr
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    BuildImageOptionsBuilder,
    CreateContainerOptions as BollardCreateContainerOptionsQuery,
    DownloadFromContainerOptions as BollardDownloadFromContainerOptionsQuery,
    LogsOptions as BollardLogsOptionsQuery, RemoveContainerOptionsBuilder,
    StartContainerOptions as BollardStartContainerOptionsQuery, UploadToContainerOptionsBuilder,
    WaitContainerOptions as BollardWaitContainerOptionsQuery,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::stream::StreamExt;
use std::time::Duration;

use super::{BuildContext, Removal, RuntimeClient, UnitHandle, UnitSpec, WaitStatus};
use crate::archive;
use crate::config::DockerConfig;
use crate::errors::RuntimeError;

/// [`RuntimeClient`] backed by the Docker Engine API.
///
/// The inner bollard client is cheap to clone and safe to use from many
/// tasks at once, so one instance is shared by all requests.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the daemon, retrying up to `max_retries` times.
    pub async fn connect(config: &DockerConfig) -> Result<Self, RuntimeError> {
        let attempts = config.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match Self::try_connect(config).await {
                Ok(docker) => {
                    log::info!("Docker client connected (attempt {}/{})", attempt, attempts);
                    return Ok(Self { docker });
                }
                Err(e) => {
                    log::error!(
                        "Docker connection failed (attempt {}/{}): {}",
                        attempt,
                        attempts,
                        e
                    );
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(config.retry_delay()).await;
                    }
                }
            }
        }

        Err(RuntimeError::Unavailable(format!(
            "giving up after {} attempts: {}",
            attempts, last_error
        )))
    }

    async fn try_connect(config: &DockerConfig) -> Result<Docker, BollardError> {
        let timeout = config.client_timeout_secs;
        let docker = match config.socket_path.as_deref() {
            Some(addr) if addr.starts_with("tcp://") || addr.starts_with("http://") => {
                Docker::connect_with_http(addr, timeout, API_DEFAULT_VERSION)?
            }
            Some(path) => Docker::connect_with_socket(
                path.trim_start_matches("unix://"),
                timeout,
                API_DEFAULT_VERSION,
            )?,
            None => Docker::connect_with_local_defaults()?.with_timeout(config.client_timeout()),
        };
        docker.ping().await?;
        Ok(docker)
    }

    /// End the connection lifecycle. Requests still holding a clone keep working.
    pub fn close(self) {
        drop(self.docker);
        log::info!("Docker client closed");
    }
}

fn is_not_found(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn build_image(&self, image: &str, context: &BuildContext) -> Result<(), RuntimeError> {
        let context_dir = context.context_dir.clone();
        let tarball = tokio::task::spawn_blocking(move || archive::pack_build_context(&context_dir))
            .await
            .map_err(|e| RuntimeError::operation("build_image", e.to_string()))??;

        let options = BuildImageOptionsBuilder::new()
            .dockerfile(&context.dockerfile)
            .t(image)
            .rm(true)
            .build();

        let mut build_stream =
            self.docker
                .build_image(options, None, Some(bollard::body_full(tarball.into())));

        while let Some(item) = build_stream.next().await {
            let info = item.map_err(|e| RuntimeError::ImageBuild {
                image: image.to_string(),
                message: e.to_string(),
            })?;
            if let Some(detail) = info.error_detail {
                return Err(RuntimeError::ImageBuild {
                    image: image.to_string(),
                    message: detail.message.unwrap_or_else(|| "unknown build error".to_string()),
                });
            }
            if let Some(line) = info.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    log::debug!("[build {}] {}", image, line);
                }
            }
        }

        Ok(())
    }

    async fn create(&self, spec: &UnitSpec) -> Result<UnitHandle, RuntimeError> {
        let options = Some(BollardCreateContainerOptionsQuery {
            name: Some(spec.name.clone()),
            ..Default::default()
        });

        let binds: Vec<String> = spec.binds.iter().map(|b| b.to_bind_string()).collect();
        let profile = &spec.profile;

        let config = ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            working_dir: Some(spec.working_dir.clone()),
            user: Some(profile.user.clone()),
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            network_disabled: Some(profile.network_disabled),
            host_config: Some(HostConfig {
                binds: if binds.is_empty() { None } else { Some(binds) },
                memory: Some(profile.memory_bytes),
                // Equal to `memory` so the unit cannot fall back on swap.
                memory_swap: Some(profile.memory_bytes),
                cpu_quota: Some(profile.cpu_quota),
                cpu_period: Some(profile.cpu_period),
                network_mode: if profile.network_disabled {
                    Some("none".to_string())
                } else {
                    None
                },
                security_opt: Some(profile.security_opts.clone()),
                auto_remove: Some(false),
                ..Default::default()
            }),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let created = self.docker.create_container(options, config).await?;
        for warning in &created.warnings {
            log::warn!("Container {}: {}", spec.name, warning);
        }

        Ok(UnitHandle {
            id: created.id,
            name: spec.name.clone(),
        })
    }

    async fn start(&self, unit: &UnitHandle) -> Result<(), RuntimeError> {
        self.docker
            .start_container(&unit.id, None::<BollardStartContainerOptionsQuery>)
            .await?;
        Ok(())
    }

    async fn wait(&self, unit: &UnitHandle, timeout: Duration) -> Result<WaitStatus, RuntimeError> {
        let mut wait_stream = self
            .docker
            .wait_container(&unit.id, None::<BollardWaitContainerOptionsQuery>);

        match tokio::time::timeout(timeout, wait_stream.next()).await {
            Err(_) => Ok(WaitStatus::TimedOut),
            Ok(Some(Ok(response))) => Ok(WaitStatus::Exited(response.status_code)),
            // bollard reports a non-zero exit as an error carrying the status code
            Ok(Some(Err(BollardError::DockerContainerWaitError { code, .. }))) => {
                Ok(WaitStatus::Exited(code))
            }
            Ok(Some(Err(e))) => Err(e.into()),
            Ok(None) => Err(RuntimeError::operation(
                "wait",
                "container wait stream ended unexpectedly",
            )),
        }
    }

    async fn logs(&self, unit: &UnitHandle) -> Result<Vec<u8>, RuntimeError> {
        let mut output_stream = self.docker.logs(
            &unit.id,
            Some(BollardLogsOptionsQuery {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        let mut output = Vec::new();
        while let Some(log_result) = output_stream.next().await {
            match log_result? {
                LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::Console { message } => output.extend_from_slice(&message),
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok(output)
    }

    async fn copy_in(
        &self,
        unit: &UnitHandle,
        target_path: &str,
        archive: Vec<u8>,
    ) -> Result<(), RuntimeError> {
        let options = UploadToContainerOptionsBuilder::new()
            .path(target_path)
            .build();
        self.docker
            .upload_to_container(&unit.id, Some(options), bollard::body_full(archive.into()))
            .await?;
        Ok(())
    }

    async fn copy_out(&self, unit: &UnitHandle, source_path: &str) -> Result<Vec<u8>, RuntimeError> {
        let options = BollardDownloadFromContainerOptionsQuery {
            path: source_path.to_string(),
        };
        let mut stream = self.docker.download_from_container(&unit.id, Some(options));

        let mut archive_data = Vec::new();
        while let Some(chunk) = stream.next().await {
            archive_data.extend_from_slice(&chunk?);
        }
        Ok(archive_data)
    }

    async fn remove(&self, name: &str, force: bool) -> Result<Removal, RuntimeError> {
        let options = RemoveContainerOptionsBuilder::new()
            .force(force)
            .v(true)
            .build();
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(Removal::Removed),
            Err(e) if is_not_found(&e) => Ok(Removal::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}
