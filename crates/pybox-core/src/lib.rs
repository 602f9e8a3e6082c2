//! Execution orchestration for sandboxed Python code.
//!
//! Each request runs in its own short-lived Docker container with a fixed
//! memory ceiling, a CPU quota, no network and an unprivileged user. The
//! crate covers the whole lifecycle of that container:
//!
//! - **Validation**: [`validation::ExecutionRequest`] rejects bad input before anything is allocated
//! - **Staging**: [`staging::FileStager`] downloads reference files into a per-request directory
//! - **Execution**: [`orchestrator::ExecutionOrchestrator`] creates, runs and waits on the container
//! - **Artifacts**: [`extractor::ArtifactExtractor`] reads generated images back out
//! - **Cleanup**: [`cleaner::ResourceCleaner`] removes the container and staging directory on every path
//!
//! The container engine sits behind [`runtime::RuntimeClient`]; the
//! production implementation is [`runtime::DockerRuntime`].

pub mod archive;
pub mod cleaner;
pub mod config;
pub mod errors;
pub mod extractor;
pub mod orchestrator;
pub mod outcome;
pub mod runtime;
pub mod staging;
pub mod validation;

pub use cleaner::{CleanupGuard, CleanupReport, ResourceCleaner};
pub use config::{ConfigLoader, SandboxConfig};
pub use errors::{ConfigError, RuntimeError, SandboxError, StagingError, ValidationError};
pub use extractor::{ArtifactExtractor, ArtifactFile};
pub use orchestrator::ExecutionOrchestrator;
pub use outcome::{ExecutionOutcome, ExecutionReport};
pub use runtime::{DockerRuntime, RuntimeClient};
pub use staging::FileStager;
pub use validation::{ExecutionRequest, RequestPolicy};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
