use rigbridge_core::path_validation::UploadError;
use rigbridge_runner::common::truncate_chars;
use rigbridge_runner::{EnvironmentError, StageError};
use thiserror::Error;

/// Longest message handed back to a user; full output stays in the logs.
pub const USER_MESSAGE_MAX_CHARS: usize = 500;

/// The one error type callers of the pipeline see.
#[derive(Debug, Error)]
pub enum RigError {
    #[error("Rigging environment unavailable: {0}")]
    EnvironmentUnavailable(String),

    #[error("Host setup timed out after {secs}s ({script}). Output: {output_tail}")]
    SetupTimeout {
        script: String,
        secs: u64,
        output_tail: String,
    },

    #[error("Failed to execute host setup script (exit code {exit_code}). Stderr: {stderr_tail}")]
    SetupFailed { exit_code: i32, stderr_tail: String },

    #[error("'{stage}' timed out after {secs}s")]
    StageTimeout { stage: String, secs: u64 },

    #[error("Error in '{stage}' (exit code {exit_code}). {diagnosis}")]
    StageFailed {
        stage: String,
        exit_code: i32,
        diagnosis: String,
    },

    #[error("'{stage}' finished but its output is missing or empty: {path}")]
    ArtifactMissing { stage: String, path: String },

    #[error("{0}")]
    InvalidInput(String),

    #[error("Rigging was cancelled")]
    Cancelled,

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl RigError {
    /// Display text bounded to [`USER_MESSAGE_MAX_CHARS`].
    pub fn user_message(&self) -> String {
        truncate_chars(&self.to_string(), USER_MESSAGE_MAX_CHARS)
    }

    /// True for errors caused by the host/tool installation rather than the request.
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            RigError::EnvironmentUnavailable(_)
                | RigError::SetupTimeout { .. }
                | RigError::SetupFailed { .. }
        )
    }
}

impl From<EnvironmentError> for RigError {
    fn from(e: EnvironmentError) -> Self {
        match e {
            EnvironmentError::Unavailable { .. } => RigError::EnvironmentUnavailable(e.to_string()),
            EnvironmentError::SetupTimeout {
                script,
                secs,
                output_tail,
            } => RigError::SetupTimeout {
                script,
                secs,
                output_tail,
            },
            EnvironmentError::SetupFailed {
                exit_code,
                stderr_tail,
                ..
            } => RigError::SetupFailed {
                exit_code,
                stderr_tail,
            },
        }
    }
}

impl From<StageError> for RigError {
    fn from(e: StageError) -> Self {
        match e {
            StageError::Timeout { stage, secs } => RigError::StageTimeout { stage, secs },
            StageError::Cancelled { .. } => RigError::Cancelled,
            StageError::Failed {
                stage,
                exit_code,
                diagnosis,
                ..
            } => RigError::StageFailed {
                stage,
                exit_code,
                diagnosis,
            },
            StageError::MissingScript { .. } | StageError::Spawn { .. } => {
                RigError::EnvironmentUnavailable(e.to_string())
            }
            StageError::Bootstrap(_) | StageError::Wait { .. } => RigError::Unexpected(e.to_string()),
        }
    }
}

impl From<UploadError> for RigError {
    fn from(e: UploadError) -> Self {
        RigError::InvalidInput(e.to_string())
    }
}
