//! Run one tool stage inside the host interpreter.
//!
//! Each call synthesizes a fresh bootstrap, launches
//! `<exe> --background --python <bootstrap> -- <args>` with the merged
//! search-path environment, waits under the stage budget and classifies the
//! outcome. The bootstrap file lives exactly as long as the call.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::bootstrap::{BootstrapError, BootstrapScript, ARG_SEPARATOR};
use crate::common::{
    isolate_process_group, wait_with_timeout, CancelToken, StageResult, Termination,
    DEFAULT_STAGE_TIMEOUT_SECS,
};
use crate::diagnosis::{diagnose, error_markers, DiagnosisKind};
use crate::env::builder::build_child_env_from_process;
use crate::info_log;
use crate::runtime_resolver::InterpreterEnvironment;

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("script not found: {path}")]
    MissingScript { path: String },

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error("'{stage}': could not launch {executable}: {source}")]
    Spawn {
        stage: String,
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{stage}': lost track of child process: {source}")]
    Wait {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{stage}' timed out after {secs}s")]
    Timeout { stage: String, secs: u64 },

    #[error("'{stage}' was cancelled")]
    Cancelled { stage: String },

    #[error("'{stage}' failed (exit code {exit_code}). {diagnosis}")]
    Failed {
        stage: String,
        exit_code: i32,
        kind: DiagnosisKind,
        diagnosis: String,
    },
}

impl StageError {
    /// Stage name, when the error happened inside a named stage.
    pub fn stage(&self) -> Option<&str> {
        match self {
            StageError::Spawn { stage, .. }
            | StageError::Wait { stage, .. }
            | StageError::Timeout { stage, .. }
            | StageError::Cancelled { stage }
            | StageError::Failed { stage, .. } => Some(stage),
            StageError::MissingScript { .. } | StageError::Bootstrap(_) => None,
        }
    }
}

/// Runs scripts through the host interpreter of a resolved environment.
#[derive(Debug, Clone)]
pub struct SubprocessRunner<'a> {
    env: &'a InterpreterEnvironment,
    timeout: Duration,
    stream_stderr: bool,
}

impl<'a> SubprocessRunner<'a> {
    pub fn new(env: &'a InterpreterEnvironment) -> Self {
        Self {
            env,
            timeout: Duration::from_secs(DEFAULT_STAGE_TIMEOUT_SECS),
            stream_stderr: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Forward child stderr to ours while it runs (it is captured either way).
    pub fn with_stream_stderr(mut self, stream: bool) -> Self {
        self.stream_stderr = stream;
        self
    }

    pub fn environment(&self) -> &InterpreterEnvironment {
        self.env
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The host command for one invocation (not yet spawned).
    pub fn build_command(&self, bootstrap: &Path, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.env.executable);
        cmd.arg("--background")
            .arg("--python")
            .arg(bootstrap)
            .arg(ARG_SEPARATOR)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if self.env.repo_root.is_dir() {
            cmd.current_dir(&self.env.repo_root);
        } else {
            tracing::warn!(
                repo_root = %self.env.repo_root.display(),
                "Repository root missing, child inherits our working directory"
            );
        }

        for (key, value) in build_child_env_from_process(self.env) {
            cmd.env(key, value);
        }
        isolate_process_group(&mut cmd);
        cmd
    }

    /// Run `target_script` with `args` as stage `stage`.
    ///
    /// Succeeds only on exit code 0. Timeouts and cancellation kill the
    /// child's process group. The bootstrap file is gone when this returns.
    pub fn run(
        &self,
        target_script: &Path,
        args: &[String],
        stage: &str,
        cancel: &CancelToken,
    ) -> Result<StageResult, StageError> {
        if !target_script.is_file() {
            return Err(StageError::MissingScript {
                path: target_script.display().to_string(),
            });
        }
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled {
                stage: stage.to_string(),
            });
        }

        let bootstrap = BootstrapScript::synthesize(target_script, &self.env.repo_root)?;
        let mut cmd = self.build_command(bootstrap.path(), args);

        info_log!(stage = %stage, script = %target_script.display(), "Running stage");
        tracing::debug!(command = ?cmd, "Host command");

        let mut child = cmd.spawn().map_err(|source| {
            tracing::error!(stage = %stage, error = %source, "Failed to launch host");
            StageError::Spawn {
                stage: stage.to_string(),
                executable: self.env.executable.display().to_string(),
                source,
            }
        })?;

        let result = wait_with_timeout(&mut child, self.timeout, cancel, self.stream_stderr)
            .map_err(|source| StageError::Wait {
                stage: stage.to_string(),
                source,
            })?;
        drop(bootstrap);

        tracing::debug!(stage = %stage, stdout = %result.stdout, "Stage stdout");

        match result.termination {
            Termination::TimedOut => {
                tracing::error!(
                    stage = %stage,
                    timeout_secs = self.timeout.as_secs(),
                    stderr = %result.stderr,
                    "Stage timed out, process group killed"
                );
                Err(StageError::Timeout {
                    stage: stage.to_string(),
                    secs: self.timeout.as_secs(),
                })
            }
            Termination::Cancelled => {
                tracing::warn!(stage = %stage, "Stage cancelled, process group killed");
                Err(StageError::Cancelled {
                    stage: stage.to_string(),
                })
            }
            Termination::Exited if result.exit_code != 0 => {
                tracing::error!(
                    stage = %stage,
                    exit_code = result.exit_code,
                    stdout = %result.stdout,
                    stderr = %result.stderr,
                    "Stage failed"
                );
                let diagnosis = diagnose(&result.stderr);
                Err(StageError::Failed {
                    stage: stage.to_string(),
                    exit_code: result.exit_code,
                    kind: diagnosis.kind,
                    diagnosis: diagnosis.message,
                })
            }
            Termination::Exited => {
                if !result.stderr.is_empty() {
                    tracing::debug!(stage = %stage, stderr = %result.stderr, "Stage stderr");
                    let markers = error_markers(&result.stderr);
                    if !markers.is_empty() {
                        tracing::warn!(
                            stage = %stage,
                            markers = ?markers,
                            "Stage exited 0 but stderr looks like an error"
                        );
                    }
                }
                info_log!(
                    stage = %stage,
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    "Stage finished"
                );
                Ok(result)
            }
        }
    }
}
