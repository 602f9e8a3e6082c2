//! In-memory collaborators for tests: a scripted [`RuntimeClient`] and a
//! local HTTP server for reference file downloads.
//!
//! [`RuntimeClient`]: crate::runtime::RuntimeClient

pub mod file_server;
pub mod mock_runtime;

pub use file_server::{FileRoute, FileServer};
pub use mock_runtime::{MockRuntime, ScriptedExit};
