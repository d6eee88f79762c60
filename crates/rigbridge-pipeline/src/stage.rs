//! Pipeline stages and the seam they are executed through.

use std::fmt;
use std::path::{Path, PathBuf};

use rigbridge_runner::{CancelToken, Device, StageError, StageResult, SubprocessRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Diagnostic,
    Skeleton,
    Skinning,
    Merge,
}

impl Stage {
    /// Tool stages in execution order (the diagnostic is optional and runs first).
    pub const TOOL_STAGES: [Stage; 3] = [Stage::Skeleton, Stage::Skinning, Stage::Merge];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Diagnostic => "Env Diagnostic",
            Stage::Skeleton => "Skeleton Prediction",
            Stage::Skinning => "Skinning Prediction",
            Stage::Merge => "Merging Results",
        }
    }

    /// Tool config selected with `--config-name=`; `None` for the diagnostic.
    pub fn config_name(&self) -> Option<&'static str> {
        match self {
            Stage::Diagnostic => None,
            Stage::Skeleton => Some("skeleton_config"),
            Stage::Skinning => Some("skin_config"),
            Stage::Merge => Some("merge_config"),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One script launch: what to run and with which forwarded arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInvocation {
    pub stage: Stage,
    pub script: PathBuf,
    pub args: Vec<String>,
    /// File the stage must leave behind, if any
    pub artifact: Option<PathBuf>,
}

fn kv(key: &str, path: &Path) -> String {
    format!("{key}={}", path.display())
}

impl StageInvocation {
    pub fn diagnostic(script: PathBuf) -> Self {
        Self {
            stage: Stage::Diagnostic,
            script,
            args: Vec::new(),
            artifact: None,
        }
    }

    /// `--config-name=skeleton_config with input=<mesh> output=<skeleton> device=<d>`
    pub fn skeleton(entry: &Path, input: &Path, output: &Path, device: Device) -> Self {
        Self::tool(Stage::Skeleton, entry, vec![kv("input", input), kv("output", output)], output, device)
    }

    /// `--config-name=skin_config with input=<skeleton> output=<skin> device=<d>`
    pub fn skinning(entry: &Path, skeleton: &Path, output: &Path, device: Device) -> Self {
        Self::tool(Stage::Skinning, entry, vec![kv("input", skeleton), kv("output", output)], output, device)
    }

    /// `--config-name=merge_config with source_path=<skin> target_path=<mesh> output_path=<final> mode=skin device=<d>`
    pub fn merge(entry: &Path, skin: &Path, mesh: &Path, output: &Path, device: Device) -> Self {
        Self::tool(
            Stage::Merge,
            entry,
            vec![
                kv("source_path", skin),
                kv("target_path", mesh),
                kv("output_path", output),
                "mode=skin".to_string(),
            ],
            output,
            device,
        )
    }

    fn tool(stage: Stage, entry: &Path, pairs: Vec<String>, artifact: &Path, device: Device) -> Self {
        let mut args = Vec::with_capacity(pairs.len() + 3);
        if let Some(config) = stage.config_name() {
            args.push(format!("--config-name={config}"));
        }
        args.push("with".to_string());
        args.extend(pairs);
        args.push(device.as_arg());
        Self {
            stage,
            script: entry.to_path_buf(),
            args,
            artifact: Some(artifact.to_path_buf()),
        }
    }
}

/// Runs a single stage. Implemented by the real subprocess runner; tests plug in fakes.
pub trait StageExecutor: Send + Sync {
    fn execute(
        &self,
        invocation: &StageInvocation,
        cancel: &CancelToken,
    ) -> Result<StageResult, StageError>;
}

impl StageExecutor for SubprocessRunner<'_> {
    fn execute(
        &self,
        invocation: &StageInvocation,
        cancel: &CancelToken,
    ) -> Result<StageResult, StageError> {
        self.run(
            &invocation.script,
            &invocation.args,
            invocation.stage.name(),
            cancel,
        )
    }
}

impl<E: StageExecutor + ?Sized> StageExecutor for &E {
    fn execute(
        &self,
        invocation: &StageInvocation,
        cancel: &CancelToken,
    ) -> Result<StageResult, StageError> {
        (**self).execute(invocation, cancel)
    }
}
