//! Request validation
//!
//! Everything here runs before a staging directory or a container exists.
//! A request that passes becomes an immutable [`ExecutionRequest`].

use crate::errors::ValidationError;
use pybox_types::{ExecuteRequest, RefFile};
use reqwest::Url;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

pub const MIN_TIMEOUT_SECS: i64 = 1;
pub const MAX_TIMEOUT_SECS: i64 = 300;

/// Fixed limits a request is checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPolicy {
    /// Every working directory must resolve under this path.
    pub allowed_root: String,
    pub default_timeout_secs: u64,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            allowed_root: pybox_types::DEFAULT_WORK_DIR.to_string(),
            default_timeout_secs: 30,
        }
    }
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    code: String,
    timeout: Duration,
    work_dir: String,
    ref_files: Vec<RefFile>,
}

impl ExecutionRequest {
    pub fn validate(request: &ExecuteRequest, policy: &RequestPolicy) -> Result<Self, ValidationError> {
        if request.code.trim().is_empty() {
            return Err(ValidationError::EmptyCode);
        }

        let timeout = request
            .timeout
            .unwrap_or(policy.default_timeout_secs as i64);
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&timeout) {
            return Err(ValidationError::TimeoutOutOfRange {
                timeout,
                min: MIN_TIMEOUT_SECS,
                max: MAX_TIMEOUT_SECS,
            });
        }

        let work_dir = resolve_work_dir(&request.work_dir, &policy.allowed_root)?;

        let ref_files = request.ref_files.clone().unwrap_or_default();
        for ref_file in &ref_files {
            validate_ref_url(&ref_file.url)?;
        }

        Ok(Self {
            code: request.code.clone(),
            timeout: Duration::from_secs(timeout as u64),
            work_dir,
            ref_files,
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Normalised working directory inside the container.
    pub fn work_dir(&self) -> &str {
        &self.work_dir
    }

    pub fn ref_files(&self) -> &[RefFile] {
        &self.ref_files
    }
}

/// Collapse `.` and `..` lexically and check the result stays under `root`.
pub fn resolve_work_dir(work_dir: &str, root: &str) -> Result<String, ValidationError> {
    if !work_dir.starts_with('/') {
        return Err(ValidationError::WorkDirNotAbsolute {
            work_dir: work_dir.to_string(),
        });
    }

    let normalised = normalise(Path::new(work_dir));
    if !normalised.starts_with(normalise(Path::new(root))) {
        return Err(ValidationError::WorkDirOutsideRoot {
            work_dir: work_dir.to_string(),
            root: root.to_string(),
        });
    }

    Ok(normalised.to_string_lossy().into_owned())
}

fn normalise(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

/// Reference files must be absolute http(s) URLs.
pub fn validate_ref_url(url: &str) -> Result<Url, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidRefFile {
        url: url.to_string(),
        reason,
    };

    let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme '{}'", other))),
    }
    if parsed.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(parsed)
}
