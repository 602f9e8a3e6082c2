//! Request and response bodies for `POST /execute`.

use serde::{Deserialize, Serialize};

/// Working directory used when a request does not name one.
pub const DEFAULT_WORK_DIR: &str = "/data";

fn default_work_dir() -> String {
    DEFAULT_WORK_DIR.to_string()
}

/// A file to fetch into the working directory before the code runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefFile {
    /// Absolute http(s) URL of the file.
    pub url: String,
    /// Target name inside the working directory. Derived from the URL when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl RefFile {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Body of an execution request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Python source passed verbatim to the interpreter.
    pub code: String,
    /// Wall-clock ceiling in seconds. Kept signed so out-of-range values reach validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_files: Option<Vec<RefFile>>,
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            timeout: None,
            work_dir: default_work_dir(),
            ref_files: None,
        }
    }

    pub fn with_timeout(mut self, timeout: i64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<String>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_ref_file(mut self, ref_file: RefFile) -> Self {
        self.ref_files.get_or_insert_with(Vec::new).push(ref_file);
        self
    }
}

/// An image produced by the executed code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFile {
    pub filename: String,
    /// Standard base64 encoding of the file bytes.
    pub content: String,
    /// Length of the decoded payload in bytes.
    pub size: u64,
}

/// Result of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub success: bool,
    /// Combined stdout and stderr of the run.
    pub output: String,
    /// Exit status of the interpreter, `-1` when none was reported.
    pub exit_code: i64,
    /// Short identifier of the container that ran the code.
    pub container_id: String,
    #[serde(default)]
    pub generated_images: Vec<ImageFile>,
    /// Set only when the sandbox infrastructure itself failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub timed_out: bool,
}
