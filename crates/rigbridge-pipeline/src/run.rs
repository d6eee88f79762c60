//! Per-run scratch state. One [`PipelineRun`] owns one temp directory holding
//! every intermediate artifact; dropping the run removes the directory.

use std::io;
use std::path::{Path, PathBuf};

use rigbridge_core::path_validation::sanitize_file_name;
use rigbridge_runner::Device;
use tempfile::TempDir;

pub const RUN_DIR_PREFIX: &str = "rigbridge_run_";

#[derive(Debug)]
pub struct PipelineRun {
    dir: Option<TempDir>,
    pub run_id: String,
    pub input: PathBuf,
    pub base_name: String,
    pub skeleton: PathBuf,
    pub skin: PathBuf,
    pub final_artifact: PathBuf,
    pub device: Device,
}

impl PipelineRun {
    /// Create a run in the system temp dir.
    pub fn create(input: &Path, device: Device) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(RUN_DIR_PREFIX).tempdir()?;
        Ok(Self::with_dir(dir, input, device))
    }

    /// Create a run under `parent` instead of the system temp dir.
    pub fn create_in(parent: &Path, input: &Path, device: Device) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(RUN_DIR_PREFIX)
            .tempdir_in(parent)?;
        Ok(Self::with_dir(dir, input, device))
    }

    fn with_dir(dir: TempDir, input: &Path, device: Device) -> Self {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let base_name = sanitize_file_name(&stem);
        let root = dir.path();
        let run_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!(run_id = %run_id, dir = %root.display(), "Run directory created");
        Self {
            skeleton: root.join(format!("{base_name}_skeleton.fbx")),
            skin: root.join(format!("{base_name}_skin.fbx")),
            final_artifact: root.join(format!("{base_name}_rigged_final.glb")),
            dir: Some(dir),
            run_id,
            input: input.to_path_buf(),
            base_name,
            device,
        }
    }

    pub fn dir(&self) -> &Path {
        match &self.dir {
            Some(d) => d.path(),
            None => Path::new(""),
        }
    }

    /// File name the persisted result gets in the output directory.
    pub fn final_file_name(&self) -> String {
        format!("{}_rigged_final.glb", self.base_name)
    }
}

impl Drop for PipelineRun {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let shown = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => tracing::debug!(dir = %shown.display(), "Run directory removed"),
                Err(e) => tracing::warn!(
                    dir = %shown.display(),
                    error = %e,
                    "Failed to remove run directory"
                ),
            }
        }
    }
}

/// True when `path` is a regular file with at least one byte.
pub fn artifact_present(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
