//! Host interpreter resolution.
//!
//! Probes a fixed, ordered list of install locations for the host executable,
//! runs the one-time setup script when nothing is found, and smoke-tests that
//! the host can import its native module. The result is an immutable
//! [`InterpreterEnvironment`] that every stage invocation borrows.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use rigbridge_core::config::schema::HOST_EXECUTABLE_NAME;
use rigbridge_core::config::{PathsConfig, TimeoutConfig};

use crate::common::{
    isolate_process_group, tail_chars, wait_with_timeout, CancelToken, StageResult, Termination,
};

/// Marker the smoke test prints once the native module imported.
pub const SMOKE_MARKER: &str = "bpy imported successfully";

/// Inline check passed to `--python-expr` by the smoke test.
pub const SMOKE_EXPR: &str = "import bpy; print('bpy imported successfully')";

/// Max stderr characters carried in setup errors.
const SETUP_STDERR_TAIL_CHARS: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("Host executable not found (searched: {searched}). {detail}")]
    Unavailable { searched: String, detail: String },
    #[error("Setup script timed out after {secs} seconds: {script}. Output: {output_tail}")]
    SetupTimeout {
        script: String,
        secs: u64,
        output_tail: String,
    },
    #[error("Failed to execute setup script {script} (exit code {exit_code}). Stderr: {stderr_tail}")]
    SetupFailed {
        script: String,
        exit_code: i32,
        stderr_tail: String,
    },
}

/// Where to look for the host and how to derive its environment.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Probed in order: direct install path, local symlink, system symlink
    pub candidates: Vec<PathBuf>,
    pub setup_script: PathBuf,
    pub setup_timeout: Duration,
    pub smoke_timeout: Duration,
    /// Working directory for the setup script
    pub app_root: PathBuf,
    pub repo_root: PathBuf,
    pub host_install_dir: PathBuf,
    pub host_python_dir: PathBuf,
    pub local_bin: PathBuf,
}

impl ResolverConfig {
    pub fn from_config(paths: &PathsConfig, timeouts: &TimeoutConfig) -> Self {
        Self {
            candidates: vec![
                paths.host_install_dir.join(HOST_EXECUTABLE_NAME),
                paths.local_bin.join(HOST_EXECUTABLE_NAME),
                paths.system_symlink.clone(),
            ],
            setup_script: paths.setup_script.clone(),
            setup_timeout: Duration::from_secs(timeouts.setup_secs),
            smoke_timeout: Duration::from_secs(timeouts.smoke_secs),
            app_root: paths.app_root.clone(),
            repo_root: paths.tool_repo.clone(),
            host_install_dir: paths.host_install_dir.clone(),
            host_python_dir: paths.host_python_dir(),
            local_bin: paths.local_bin.clone(),
        }
    }
}

/// Resolved host interpreter plus the search-path entries every child gets.
///
/// Built once at startup; immutable afterwards. Tests construct it directly
/// with [`InterpreterEnvironment::new`] to point at a fake host.
#[derive(Debug, Clone)]
pub struct InterpreterEnvironment {
    /// Absolute path to the host executable
    pub executable: PathBuf,
    /// Tool repository root; children run with this as cwd
    pub repo_root: PathBuf,
    /// Native library directories (prepended to LD_LIBRARY_PATH when present)
    pub library_paths: Vec<PathBuf>,
    /// Module search entries (prepended to PYTHONPATH)
    pub module_paths: Vec<PathBuf>,
    /// Directory prepended to PATH when it exists
    pub exec_path_prefix: Option<PathBuf>,
    /// Whether the startup import smoke test passed
    pub smoke_ok: bool,
}

impl InterpreterEnvironment {
    /// Minimal environment: module paths are the repo root and `repo/src`.
    ///
    /// A relative repo root is resolved against the current directory.
    pub fn new(executable: impl Into<PathBuf>, repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        let repo_root = std::path::absolute(&repo_root).unwrap_or(repo_root);
        Self {
            executable: executable.into(),
            module_paths: vec![repo_root.clone(), repo_root.join("src")],
            repo_root,
            library_paths: Vec::new(),
            exec_path_prefix: None,
            smoke_ok: true,
        }
    }

    pub fn with_library_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.library_paths = paths;
        self
    }

    pub fn with_exec_path_prefix(mut self, dir: Option<PathBuf>) -> Self {
        self.exec_path_prefix = dir;
        self
    }

    pub fn with_extra_module_path(mut self, dir: PathBuf) -> Self {
        self.module_paths.push(dir);
        self
    }
}

/// First existing candidate, in order.
pub fn probe(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.exists()).map(|p| {
        tracing::info!(path = %p.display(), "Host executable found");
        std::path::absolute(p).unwrap_or_else(|_| p.clone())
    })
}

/// Locate (installing if needed) and smoke-test the host interpreter.
///
/// Fails with [`EnvironmentError`] when the host can't be found or installed.
/// A failing smoke test is only a warning: stages still run and surface the
/// real error themselves.
pub fn resolve(cfg: &ResolverConfig) -> Result<InterpreterEnvironment, EnvironmentError> {
    tracing::info!(
        candidates = ?cfg.candidates,
        repo_root = %cfg.repo_root.display(),
        "Resolving host interpreter"
    );

    let executable = match probe(&cfg.candidates) {
        Some(exe) => exe,
        None => {
            tracing::warn!("Host executable not found, running setup script");
            let setup_output = run_setup(cfg)?;
            probe(&cfg.candidates).ok_or_else(|| EnvironmentError::Unavailable {
                searched: format_candidates(&cfg.candidates),
                detail: format!(
                    "Setup script ran but the host executable is still missing. Setup output: {}",
                    setup_output
                ),
            })?
        }
    };

    let smoke_ok = smoke_test(&executable, cfg.smoke_timeout);

    let repo_root = std::path::absolute(&cfg.repo_root).unwrap_or_else(|_| cfg.repo_root.clone());
    let mut module_paths = vec![repo_root.clone(), repo_root.join("src")];
    if cfg.app_root != repo_root {
        module_paths.push(cfg.app_root.clone());
    }
    let library_paths: Vec<PathBuf> = [
        cfg.host_install_dir.join("lib"),
        cfg.host_python_dir.join("lib"),
    ]
    .into_iter()
    .filter(|p| p.is_dir())
    .collect();
    let exec_path_prefix = Some(cfg.local_bin.clone()).filter(|p| p.is_dir());

    Ok(InterpreterEnvironment {
        executable,
        repo_root,
        library_paths,
        module_paths,
        exec_path_prefix,
        smoke_ok,
    })
}

fn format_candidates(candidates: &[PathBuf]) -> String {
    candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Last [`SETUP_STDERR_TAIL_CHARS`] of stderr, or of stdout when stderr is empty.
fn captured_tail(result: &StageResult) -> String {
    let text = if result.stderr.trim().is_empty() {
        &result.stdout
    } else {
        &result.stderr
    };
    tail_chars(text.trim_end(), SETUP_STDERR_TAIL_CHARS).to_string()
}

/// Run `bash <setup_script>` once under the setup time budget.
///
/// Returns the tail of the captured output on success.
fn run_setup(cfg: &ResolverConfig) -> Result<String, EnvironmentError> {
    let script = cfg.setup_script.display().to_string();
    if !cfg.setup_script.is_file() {
        return Err(EnvironmentError::Unavailable {
            searched: format_candidates(&cfg.candidates),
            detail: format!("Setup script missing: {}", script),
        });
    }

    let mut cmd = Command::new("bash");
    cmd.arg(&cfg.setup_script)
        .current_dir(existing_dir_or_cwd(&cfg.app_root))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    isolate_process_group(&mut cmd);

    let mut child = cmd.spawn().map_err(|e| EnvironmentError::SetupFailed {
        script: script.clone(),
        exit_code: -1,
        stderr_tail: format!("could not launch bash: {}", e),
    })?;
    let result = wait_with_timeout(&mut child, cfg.setup_timeout, &CancelToken::new(), false)
        .map_err(|e| EnvironmentError::SetupFailed {
            script: script.clone(),
            exit_code: -1,
            stderr_tail: format!("lost track of setup process: {}", e),
        })?;

    tracing::debug!(stdout = %result.stdout, "Setup stdout");
    if !result.stderr.is_empty() {
        tracing::debug!(stderr = %result.stderr, "Setup stderr");
    }

    match result.termination {
        Termination::TimedOut | Termination::Cancelled => {
            tracing::error!(script = %script, "Setup script timed out");
            Err(EnvironmentError::SetupTimeout {
                script,
                secs: cfg.setup_timeout.as_secs(),
                output_tail: captured_tail(&result),
            })
        }
        Termination::Exited if result.exit_code != 0 => {
            tracing::error!(
                script = %script,
                exit_code = result.exit_code,
                stderr = %result.stderr,
                "Setup script failed"
            );
            Err(EnvironmentError::SetupFailed {
                script,
                exit_code: result.exit_code,
                stderr_tail: captured_tail(&result),
            })
        }
        Termination::Exited => {
            tracing::info!(
                elapsed_ms = result.elapsed.as_millis() as u64,
                "Setup script executed successfully"
            );
            Ok(captured_tail(&result))
        }
    }
}

fn existing_dir_or_cwd(dir: &Path) -> PathBuf {
    if dir.is_dir() {
        dir.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }
}

/// Launch `<exe> --background --python-expr <import check>` and look for the
/// success marker on stdout. Never fatal.
pub fn smoke_test(executable: &Path, timeout: Duration) -> bool {
    let mut cmd = Command::new(executable);
    cmd.args(["--background", "--python-expr", SMOKE_EXPR])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    isolate_process_group(&mut cmd);

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "Import smoke test could not launch host");
            return false;
        }
    };
    let result = match wait_with_timeout(&mut child, timeout, &CancelToken::new(), false) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "Import smoke test lost track of host process");
            return false;
        }
    };

    match result.termination {
        Termination::Exited if result.exit_code == 0 && result.stdout.contains(SMOKE_MARKER) => {
            tracing::info!("Native module import smoke test passed");
            true
        }
        Termination::Exited if result.exit_code == 0 => {
            tracing::warn!(
                stdout = %result.stdout,
                stderr = %result.stderr,
                "Import smoke test gave unexpected output"
            );
            false
        }
        Termination::Exited => {
            tracing::warn!(
                exit_code = result.exit_code,
                stdout = %result.stdout,
                stderr = %result.stderr,
                "Import smoke test failed"
            );
            false
        }
        Termination::TimedOut | Termination::Cancelled => {
            tracing::warn!(
                timeout_secs = timeout.as_secs(),
                "Import smoke test timed out"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config_in(root: &Path) -> ResolverConfig {
        ResolverConfig {
            candidates: vec![
                root.join("install").join("blender"),
                root.join("local_bin").join("blender"),
                root.join("system").join("blender"),
            ],
            setup_script: root.join("setup_blender.sh"),
            setup_timeout: Duration::from_secs(20),
            smoke_timeout: Duration::from_secs(10),
            app_root: root.to_path_buf(),
            repo_root: root.join("UniRig"),
            host_install_dir: root.join("install"),
            host_python_dir: root.join("install").join("4.2").join("python"),
            local_bin: root.join("local_bin"),
        }
    }

    #[cfg(unix)]
    fn write_executable(path: &Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_new_environment_has_absolute_repo_root() {
        let env = InterpreterEnvironment::new("blender", "UniRig");
        let expected = std::env::current_dir().unwrap().join("UniRig");
        assert_eq!(env.repo_root, expected);
        assert_eq!(env.module_paths, vec![expected.clone(), expected.join("src")]);
    }

    #[test]
    fn test_probe_respects_order() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path());
        fs::create_dir_all(tmp.path().join("local_bin")).unwrap();
        fs::write(&cfg.candidates[1], "").unwrap();
        fs::create_dir_all(tmp.path().join("system")).unwrap();
        fs::write(&cfg.candidates[2], "").unwrap();
        assert_eq!(probe(&cfg.candidates).unwrap(), cfg.candidates[1]);
    }

    #[test]
    fn test_resolve_unavailable_without_host_or_setup() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path());
        match resolve(&cfg) {
            Err(EnvironmentError::Unavailable { detail, .. }) => {
                assert!(detail.contains("Setup script missing"));
            }
            other => panic!("expected Unavailable, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_runs_setup_then_finds_host() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path());
        let target = cfg.candidates[0].display().to_string();
        let setup = format!(
            "mkdir -p \"$(dirname '{t}')\"\nprintf '#!/bin/sh\\necho bpy imported successfully\\n' > '{t}'\nchmod +x '{t}'\n",
            t = target
        );
        fs::write(&cfg.setup_script, setup).unwrap();
        fs::create_dir_all(tmp.path().join("local_bin")).unwrap();

        let env = resolve(&cfg).unwrap();
        assert_eq!(env.executable, cfg.candidates[0]);
        assert!(env.smoke_ok);
        assert_eq!(env.exec_path_prefix.as_deref(), Some(cfg.local_bin.as_path()));
        assert_eq!(env.module_paths[0], cfg.repo_root);
        assert_eq!(env.module_paths[1], cfg.repo_root.join("src"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_setup_failure_carries_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path());
        fs::write(&cfg.setup_script, "echo 'download refused' >&2\nexit 4\n").unwrap();
        match resolve(&cfg) {
            Err(EnvironmentError::SetupFailed {
                exit_code,
                stderr_tail,
                ..
            }) => {
                assert_eq!(exit_code, 4);
                assert!(stderr_tail.contains("download refused"));
            }
            other => panic!("expected SetupFailed, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_setup_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = config_in(tmp.path());
        cfg.setup_timeout = Duration::from_millis(500);
        fs::write(
            &cfg.setup_script,
            "echo 'fetching host archive' >&2\nsleep 30\n",
        )
        .unwrap();
        match resolve(&cfg) {
            Err(EnvironmentError::SetupTimeout { output_tail, .. }) => {
                assert!(output_tail.contains("fetching host archive"));
            }
            other => panic!("expected SetupTimeout, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_setup_success_without_host_reports_output() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path());
        fs::write(&cfg.setup_script, "echo 'mirror returned 404'\nexit 0\n").unwrap();
        match resolve(&cfg) {
            Err(EnvironmentError::Unavailable { detail, .. }) => {
                assert!(detail.contains("still missing"));
                assert!(detail.contains("mirror returned 404"));
            }
            other => panic!("expected Unavailable, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_makes_repo_root_absolute() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = config_in(tmp.path());
        cfg.repo_root = PathBuf::from("UniRig");
        write_executable(&cfg.candidates[0], "#!/bin/sh\necho bpy imported successfully\n");
        let env = resolve(&cfg).unwrap();
        let expected = std::env::current_dir().unwrap().join("UniRig");
        assert_eq!(env.repo_root, expected);
        assert_eq!(env.module_paths[0], expected);
        assert_eq!(env.module_paths[1], expected.join("src"));
    }

    #[cfg(unix)]
    #[test]
    fn test_smoke_failure_is_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path());
        write_executable(
            &cfg.candidates[2],
            "#!/bin/sh\necho \"ModuleNotFoundError: No module named 'bpy'\" >&2\nexit 1\n",
        );
        let env = resolve(&cfg).unwrap();
        assert_eq!(env.executable, cfg.candidates[2]);
        assert!(!env.smoke_ok);
    }

    #[cfg(unix)]
    #[test]
    fn test_library_paths_only_include_existing_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path());
        write_executable(&cfg.candidates[0], "#!/bin/sh\necho bpy imported successfully\n");
        fs::create_dir_all(cfg.host_install_dir.join("lib")).unwrap();
        let env = resolve(&cfg).unwrap();
        assert_eq!(env.library_paths, vec![cfg.host_install_dir.join("lib")]);
    }
}
