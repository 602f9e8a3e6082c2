//! Execution outcomes
//!
//! Every request that gets as far as running a unit ends in exactly one
//! [`ExecutionOutcome`]. Failures of the user's code are outcomes, not
//! errors, so they reach the caller with their output intact.

use pybox_types::{ExecuteResponse, ImageFile};

/// Exit code reported when the unit never produced one.
pub const MISSING_EXIT_CODE: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success {
        exit_code: i64,
        output: String,
    },
    /// The code ran to completion with a non-zero status.
    ExecutionFailure {
        exit_code: i64,
        output: String,
    },
    /// The timeout expired. The unit was killed during cleanup.
    TimeoutFailure {
        partial_output: String,
    },
    /// The sandbox itself failed after the unit was created.
    InfrastructureError {
        reason: String,
        output: String,
    },
}

impl ExecutionOutcome {
    pub fn from_exit(exit_code: i64, output: String) -> Self {
        if exit_code == 0 {
            ExecutionOutcome::Success { exit_code, output }
        } else {
            ExecutionOutcome::ExecutionFailure { exit_code, output }
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    pub fn exit_code(&self) -> i64 {
        match self {
            ExecutionOutcome::Success { exit_code, .. }
            | ExecutionOutcome::ExecutionFailure { exit_code, .. } => *exit_code,
            ExecutionOutcome::TimeoutFailure { .. }
            | ExecutionOutcome::InfrastructureError { .. } => MISSING_EXIT_CODE,
        }
    }

    pub fn output(&self) -> &str {
        match self {
            ExecutionOutcome::Success { output, .. }
            | ExecutionOutcome::ExecutionFailure { output, .. }
            | ExecutionOutcome::InfrastructureError { output, .. } => output,
            ExecutionOutcome::TimeoutFailure { partial_output } => partial_output,
        }
    }

    pub fn timed_out(&self) -> bool {
        matches!(self, ExecutionOutcome::TimeoutFailure { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::InfrastructureError { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// What one execution produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Short id of the unit that ran the code.
    pub unit_id: String,
    pub outcome: ExecutionOutcome,
    pub artifacts: Vec<ImageFile>,
}

impl From<ExecutionReport> for ExecuteResponse {
    fn from(report: ExecutionReport) -> Self {
        let success = report.outcome.success();
        let exit_code = report.outcome.exit_code();
        let timed_out = report.outcome.timed_out();
        let error_message = report.outcome.error_message().map(str::to_string);
        let output = match report.outcome {
            ExecutionOutcome::Success { output, .. }
            | ExecutionOutcome::ExecutionFailure { output, .. }
            | ExecutionOutcome::InfrastructureError { output, .. } => output,
            ExecutionOutcome::TimeoutFailure { partial_output } => partial_output,
        };

        ExecuteResponse {
            success,
            output,
            exit_code,
            container_id: report.unit_id,
            generated_images: report.artifacts,
            error_message,
            timed_out,
        }
    }
}
