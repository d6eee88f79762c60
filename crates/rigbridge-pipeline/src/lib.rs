//! Auto-rigging pipeline: DIAGNOSTIC → SKELETON → SKINNING → MERGE.
//!
//! Stages share nothing but files in the run directory. Each tool stage is
//! gated on its declared artifact existing and being non-empty; the first
//! failure aborts the run. The run directory is removed on every path, and a
//! successful result is copied to `<output_dir>/<run_id>/` before that.

pub mod diagnostic;
pub mod error;
pub mod fixup;
pub mod run;
pub mod stage;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rigbridge_core::observability;
use rigbridge_core::path_validation::validate_mesh_upload;
use rigbridge_runner::{info_log, CancelToken, Device, StageError};

pub use error::RigError;
pub use run::PipelineRun;
pub use stage::{Stage, StageExecutor, StageInvocation};

use run::artifact_present;

/// Entry script of the tool repository.
pub const TOOL_ENTRY_SCRIPT: &str = "run.py";

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub device: Device,
    /// Run the advisory environment diagnostic first
    pub run_diagnostic: bool,
    /// Final artifacts land in `<output_dir>/<run_id>/`
    pub output_dir: PathBuf,
    /// Parent for run directories; system temp dir when `None`
    pub scratch_dir: Option<PathBuf>,
}

impl PipelineOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            device: Device::Cpu,
            run_diagnostic: true,
            output_dir: output_dir.into(),
            scratch_dir: None,
        }
    }
}

pub struct Pipeline<E> {
    executor: E,
    repo_root: PathBuf,
    options: PipelineOptions,
}

impl<E: StageExecutor> Pipeline<E> {
    pub fn new(executor: E, repo_root: impl Into<PathBuf>, options: PipelineOptions) -> Self {
        Self {
            executor,
            repo_root: repo_root.into(),
            options,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn tool_entry(&self) -> PathBuf {
        self.repo_root.join(TOOL_ENTRY_SCRIPT)
    }

    /// Rig the mesh at `input` and return the persisted `.glb` path.
    pub fn process_upload(&self, input: &Path, cancel: &CancelToken) -> Result<PathBuf, RigError> {
        let input = validate_mesh_upload(input)?;

        let entry = self.tool_entry();
        if !entry.is_file() {
            return Err(RigError::EnvironmentUnavailable(format!(
                "tool entry script not found at {}",
                entry.display()
            )));
        }

        let run = match &self.options.scratch_dir {
            Some(parent) => PipelineRun::create_in(parent, &input, self.options.device),
            None => PipelineRun::create(&input, self.options.device),
        }
        .map_err(|e| RigError::Unexpected(format!("could not create run directory: {e}")))?;

        info_log!(
            run_id = %run.run_id,
            input = %input.display(),
            device = %run.device,
            "Rigging started"
        );
        observability::audit_run_started(
            &run.run_id,
            &input.display().to_string(),
            &run.device.to_string(),
        );

        let started = Instant::now();
        let outcome = self.execute_run(&run, &entry, cancel);
        let duration_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(path) => {
                info_log!(run_id = %run.run_id, output = %path.display(), duration_ms, "Rigging finished");
                observability::audit_run_finished(
                    &run.run_id,
                    Some(&path.display().to_string()),
                    None,
                    duration_ms,
                );
            }
            Err(e) => {
                tracing::error!(run_id = %run.run_id, error = %e, "Rigging failed");
                observability::audit_run_finished(&run.run_id, None, Some(&e.user_message()), duration_ms);
            }
        }
        outcome
    }

    fn execute_run(&self, run: &PipelineRun, entry: &Path, cancel: &CancelToken) -> Result<PathBuf, RigError> {
        if self.options.run_diagnostic {
            self.run_diagnostic(run, cancel)?;
        }

        let stages = [
            StageInvocation::skeleton(entry, &run.input, &run.skeleton, run.device),
            StageInvocation::skinning(entry, &run.skeleton, &run.skin, run.device),
            StageInvocation::merge(entry, &run.skin, &run.input, &run.final_artifact, run.device),
        ];
        for invocation in &stages {
            self.run_stage(run, invocation, cancel)?;
        }

        self.persist(run)
    }

    /// Advisory: only cancellation propagates.
    fn run_diagnostic(&self, run: &PipelineRun, cancel: &CancelToken) -> Result<(), RigError> {
        let script = match diagnostic::write_script(run.dir(), &self.repo_root) {
            Ok(script) => script,
            Err(e) => {
                tracing::warn!(error = %e, "Could not write diagnostic script, skipping diagnostic");
                observability::audit_stage_completed(&run.run_id, Stage::Diagnostic.name(), false, 0);
                return Ok(());
            }
        };
        let invocation = StageInvocation::diagnostic(script);
        let started = Instant::now();
        let result = self.executor.execute(&invocation, cancel);
        let ok = result.is_ok();
        observability::audit_stage_completed(
            &run.run_id,
            Stage::Diagnostic.name(),
            ok,
            started.elapsed().as_millis() as u64,
        );
        match result {
            Ok(r) => {
                tracing::debug!(stdout = %r.stdout, "Diagnostic output");
                Ok(())
            }
            Err(StageError::Cancelled { .. }) => Err(RigError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "Environment diagnostic failed, continuing");
                Ok(())
            }
        }
    }

    fn run_stage(&self, run: &PipelineRun, invocation: &StageInvocation, cancel: &CancelToken) -> Result<(), RigError> {
        if cancel.is_cancelled() {
            return Err(RigError::Cancelled);
        }
        let stage = invocation.stage.name();
        let started = Instant::now();
        let result = self.executor.execute(invocation, cancel);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let artifact_ok = invocation.artifact.as_deref().map_or(true, artifact_present);
        observability::audit_stage_completed(&run.run_id, stage, result.is_ok() && artifact_ok, elapsed_ms);

        result?;
        if let Some(artifact) = &invocation.artifact {
            if !artifact_ok {
                tracing::error!(stage = %stage, path = %artifact.display(), "Stage output missing or empty");
                return Err(RigError::ArtifactMissing {
                    stage: stage.to_string(),
                    path: artifact.display().to_string(),
                });
            }
        }
        Ok(())
    }

    fn persist(&self, run: &PipelineRun) -> Result<PathBuf, RigError> {
        let dest_dir = self.options.output_dir.join(&run.run_id);
        fs::create_dir_all(&dest_dir).map_err(|e| {
            RigError::Unexpected(format!("could not create output dir {}: {e}", dest_dir.display()))
        })?;
        let dest = dest_dir.join(run.final_file_name());
        fs::copy(&run.final_artifact, &dest).map_err(|e| {
            RigError::Unexpected(format!("could not persist result to {}: {e}", dest.display()))
        })?;
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigbridge_runner::{DiagnosisKind, StageResult, Termination};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        SucceedWithoutArtifact,
        Fail,
        Timeout,
        Cancel,
    }

    /// Records invocations; writes the declared artifact unless told otherwise.
    struct FakeExecutor {
        calls: Mutex<Vec<StageInvocation>>,
        behavior: fn(Stage) -> Behavior,
    }

    impl FakeExecutor {
        fn new(behavior: fn(Stage) -> Behavior) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                behavior,
            }
        }

        fn stages(&self) -> Vec<Stage> {
            self.calls.lock().unwrap().iter().map(|c| c.stage).collect()
        }

        fn calls(&self) -> Vec<StageInvocation> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn ok_result() -> StageResult {
        StageResult {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
            termination: Termination::Exited,
            elapsed: Duration::from_millis(1),
        }
    }

    impl StageExecutor for FakeExecutor {
        fn execute(&self, invocation: &StageInvocation, _cancel: &CancelToken) -> Result<StageResult, StageError> {
            self.calls.lock().unwrap().push(invocation.clone());
            let stage = invocation.stage.name().to_string();
            match (self.behavior)(invocation.stage) {
                Behavior::Succeed => {
                    if let Some(artifact) = &invocation.artifact {
                        fs::write(artifact, b"mesh-bytes").unwrap();
                    }
                    Ok(ok_result())
                }
                Behavior::SucceedWithoutArtifact => Ok(ok_result()),
                Behavior::Fail => Err(StageError::Failed {
                    stage,
                    exit_code: 1,
                    kind: DiagnosisKind::Unknown,
                    diagnosis: "Check logs. Last error lines:\nboom".to_string(),
                }),
                Behavior::Timeout => Err(StageError::Timeout { stage, secs: 1 }),
                Behavior::Cancel => Err(StageError::Cancelled { stage }),
            }
        }
    }

    struct Fixture {
        _root: tempfile::TempDir,
        repo: PathBuf,
        input: PathBuf,
        output: PathBuf,
        scratch: PathBuf,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let repo = root.path().join("repo");
        fs::create_dir_all(&repo).unwrap();
        fs::write(repo.join(TOOL_ENTRY_SCRIPT), "print('run')\n").unwrap();
        let input = root.path().join("chair.glb");
        fs::write(&input, b"glTF").unwrap();
        let scratch = root.path().join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        Fixture {
            repo,
            input,
            output: root.path().join("out"),
            scratch,
            _root: root,
        }
    }

    fn pipeline<'a>(fx: &Fixture, exec: &'a FakeExecutor, diagnostic: bool) -> Pipeline<&'a FakeExecutor> {
        let mut options = PipelineOptions::new(&fx.output);
        options.run_diagnostic = diagnostic;
        options.scratch_dir = Some(fx.scratch.clone());
        Pipeline::new(exec, &fx.repo, options)
    }

    fn scratch_is_empty(fx: &Fixture) -> bool {
        fs::read_dir(&fx.scratch).unwrap().next().is_none()
    }

    #[test]
    fn test_success_runs_all_stages_and_persists() {
        let fx = fixture();
        let exec = FakeExecutor::new(|_| Behavior::Succeed);
        let out = pipeline(&fx, &exec, true)
            .process_upload(&fx.input, &CancelToken::new())
            .unwrap();

        assert_eq!(
            exec.stages(),
            vec![Stage::Diagnostic, Stage::Skeleton, Stage::Skinning, Stage::Merge]
        );
        assert!(out.starts_with(&fx.output));
        assert_eq!(out.file_name().unwrap(), "chair_rigged_final.glb");
        assert_eq!(fs::read(&out).unwrap(), b"mesh-bytes");
        assert!(scratch_is_empty(&fx));

        let calls = exec.calls();
        let skeleton = &calls[1];
        assert_eq!(skeleton.script, fx.repo.join(TOOL_ENTRY_SCRIPT));
        assert!(skeleton.args.contains(&"device=cpu".to_string()));
        let skin_input = format!("input={}", calls[1].artifact.as_ref().unwrap().display());
        assert!(calls[2].args.contains(&skin_input));
    }

    #[test]
    fn test_failing_stage_short_circuits() {
        let fx = fixture();
        let exec = FakeExecutor::new(|s| if s == Stage::Skinning { Behavior::Fail } else { Behavior::Succeed });
        let err = pipeline(&fx, &exec, false)
            .process_upload(&fx.input, &CancelToken::new())
            .unwrap_err();

        assert!(matches!(err, RigError::StageFailed { ref stage, .. } if stage == "Skinning Prediction"));
        assert_eq!(exec.stages(), vec![Stage::Skeleton, Stage::Skinning]);
        assert!(scratch_is_empty(&fx));
        assert!(!fx.output.exists());
    }

    #[test]
    fn test_missing_artifact_stops_pipeline() {
        let fx = fixture();
        let exec = FakeExecutor::new(|s| {
            if s == Stage::Skeleton {
                Behavior::SucceedWithoutArtifact
            } else {
                Behavior::Succeed
            }
        });
        let err = pipeline(&fx, &exec, false)
            .process_upload(&fx.input, &CancelToken::new())
            .unwrap_err();

        match err {
            RigError::ArtifactMissing { stage, path } => {
                assert_eq!(stage, "Skeleton Prediction");
                assert!(path.ends_with("chair_skeleton.fbx"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(exec.stages(), vec![Stage::Skeleton]);
        assert!(scratch_is_empty(&fx));
    }

    #[test]
    fn test_wrong_extension_runs_nothing() {
        let fx = fixture();
        let obj = fx.input.with_extension("obj");
        fs::write(&obj, b"v 0 0 0").unwrap();
        let exec = FakeExecutor::new(|_| Behavior::Succeed);
        let p = pipeline(&fx, &exec, true);

        assert!(matches!(
            p.process_upload(&obj, &CancelToken::new()),
            Err(RigError::InvalidInput(_))
        ));
        assert!(matches!(
            p.process_upload(&fx.input.with_file_name("missing.glb"), &CancelToken::new()),
            Err(RigError::InvalidInput(_))
        ));
        assert!(exec.stages().is_empty());
    }

    #[test]
    fn test_missing_entry_script_is_environment_error() {
        let fx = fixture();
        fs::remove_file(fx.repo.join(TOOL_ENTRY_SCRIPT)).unwrap();
        let exec = FakeExecutor::new(|_| Behavior::Succeed);
        let err = pipeline(&fx, &exec, true)
            .process_upload(&fx.input, &CancelToken::new())
            .unwrap_err();
        assert!(err.is_environment());
        assert!(exec.stages().is_empty());
    }

    #[test]
    fn test_diagnostic_failure_is_not_fatal() {
        let fx = fixture();
        let exec = FakeExecutor::new(|s| if s == Stage::Diagnostic { Behavior::Fail } else { Behavior::Succeed });
        let out = pipeline(&fx, &exec, true)
            .process_upload(&fx.input, &CancelToken::new())
            .unwrap();
        assert!(out.is_file());
        assert_eq!(exec.stages().len(), 4);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unwritable_diagnostic_script_is_not_fatal() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let mut fx = fixture();
        // A repo path that can't be embedded in the diagnostic script.
        let repo = fx.repo.with_file_name(OsStr::from_bytes(b"repo\xff"));
        fs::create_dir_all(&repo).unwrap();
        fs::write(repo.join(TOOL_ENTRY_SCRIPT), "print('run')\n").unwrap();
        fx.repo = repo;

        let exec = FakeExecutor::new(|_| Behavior::Succeed);
        let out = pipeline(&fx, &exec, true)
            .process_upload(&fx.input, &CancelToken::new())
            .unwrap();
        assert!(out.is_file());
        assert_eq!(exec.stages(), vec![Stage::Skeleton, Stage::Skinning, Stage::Merge]);
        assert!(scratch_is_empty(&fx));
    }

    #[test]
    fn test_cancel_during_diagnostic_aborts() {
        let fx = fixture();
        let exec = FakeExecutor::new(|s| if s == Stage::Diagnostic { Behavior::Cancel } else { Behavior::Succeed });
        let err = pipeline(&fx, &exec, true)
            .process_upload(&fx.input, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, RigError::Cancelled));
        assert_eq!(exec.stages(), vec![Stage::Diagnostic]);
    }

    #[test]
    fn test_cancelled_token_runs_no_tool_stage() {
        let fx = fixture();
        let exec = FakeExecutor::new(|_| Behavior::Succeed);
        let token = CancelToken::new();
        token.cancel();
        let err = pipeline(&fx, &exec, false)
            .process_upload(&fx.input, &token)
            .unwrap_err();
        assert!(matches!(err, RigError::Cancelled));
        assert!(exec.stages().is_empty());
    }

    #[test]
    fn test_timeout_maps_to_stage_timeout() {
        let fx = fixture();
        let exec = FakeExecutor::new(|s| if s == Stage::Merge { Behavior::Timeout } else { Behavior::Succeed });
        let err = pipeline(&fx, &exec, false)
            .process_upload(&fx.input, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, RigError::StageTimeout { ref stage, .. } if stage == "Merging Results"));
        assert!(scratch_is_empty(&fx));
    }

    #[test]
    fn test_concurrent_runs_are_isolated() {
        let fx = fixture();
        let exec = FakeExecutor::new(|_| Behavior::Succeed);
        let p = pipeline(&fx, &exec, false);

        let (a, b) = std::thread::scope(|s| {
            let ha = s.spawn(|| p.process_upload(&fx.input, &CancelToken::new()));
            let hb = s.spawn(|| p.process_upload(&fx.input, &CancelToken::new()));
            (ha.join().unwrap().unwrap(), hb.join().unwrap().unwrap())
        });
        assert_ne!(a, b);
        assert!(a.is_file() && b.is_file());

        let run_dirs: std::collections::HashSet<PathBuf> = exec
            .calls()
            .iter()
            .filter_map(|c| c.artifact.as_ref()?.parent().map(Path::to_path_buf))
            .collect();
        assert_eq!(run_dirs.len(), 2);
        assert!(scratch_is_empty(&fx));
    }
}
