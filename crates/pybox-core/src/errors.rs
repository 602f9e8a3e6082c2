//! Error types for the execution pipeline
//!
//! Errors are grouped by the stage that produces them. Only validation,
//! staging and runtime availability failures leave the orchestrator as
//! errors; problems caused by the executed code itself are folded into
//! [`crate::outcome::ExecutionOutcome`] instead.

use std::path::PathBuf;
use thiserror::Error;

/// Caller input rejected before any resource is allocated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Code must not be empty")]
    EmptyCode,
    #[error("Timeout must be between {min} and {max} seconds, got {timeout}")]
    TimeoutOutOfRange { timeout: i64, min: i64, max: i64 },
    #[error("Working directory '{work_dir}' must be an absolute path")]
    WorkDirNotAbsolute { work_dir: String },
    #[error("Working directory '{work_dir}' must be under {root}")]
    WorkDirOutsideRoot { work_dir: String, root: String },
    #[error("Invalid reference file URL '{url}': {reason}")]
    InvalidRefFile { url: String, reason: String },
}

/// Failure while fetching reference files into the staging directory.
#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Invalid download URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Refusing to stage file with unsafe name '{filename}'")]
    UnsafeFilename { filename: String },
    #[error("Failed to download file from {url}: HTTP {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("Error downloading file from {url}: {message}")]
    Network { url: String, message: String },
    #[error("Could not write staged file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by a [`crate::runtime::RuntimeClient`].
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Bollard (Docker client) error: {0}")]
    BollardError(#[from] bollard::errors::Error),
    #[error("Container runtime unavailable: {0}")]
    Unavailable(String),
    #[error("Runtime operation '{operation}' failed: {message}")]
    OperationFailed { operation: String, message: String },
    #[error("Image build failed for '{image}': {message}")]
    ImageBuild { image: String, message: String },
    #[error("I/O error during runtime operation: {0}")]
    IoError(#[from] std::io::Error),
}

impl RuntimeError {
    pub fn operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        RuntimeError::OperationFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Failures surfaced by [`crate::orchestrator::ExecutionOrchestrator::execute`].
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error("Execution runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Invalid or unreadable process configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {message}", path.display())]
    Read { path: PathBuf, message: String },
    #[error("Failed to parse YAML config: {0}")]
    Parse(String),
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }
}
