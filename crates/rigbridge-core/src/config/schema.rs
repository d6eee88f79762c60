//! Config structs grouped by concern, loaded from the environment.

use super::env_keys::{
    observability as obv_keys, paths as path_keys, pipeline as pipe_keys, serve as serve_keys,
    timeouts as timeout_keys,
};
use super::loader::{env_bool, env_optional, env_or, env_u64, load_dotenv};
use std::path::{Path, PathBuf};

/// Default host release bundled by the setup script.
pub const DEFAULT_HOST_RELEASE: &str = "blender-4.2.0-linux-x64";

/// Default version directory inside the host install (`<install>/<ver>/python`).
pub const DEFAULT_HOST_VERSION_DIR: &str = "4.2";

/// Default system-wide host symlink.
pub const DEFAULT_HOST_SYMLINK: &str = "/usr/local/bin/blender";

/// Host executable file name inside the install dir and `local_bin/`.
pub const HOST_EXECUTABLE_NAME: &str = "blender";

/// Device selector used when `RIGBRIDGE_DEVICE` is unset: probe for a GPU, else CPU.
pub const DEFAULT_DEVICE_SELECTOR: &str = "auto";

/// Relative overrides are taken relative to `app_root`; the result is absolute.
fn under_app_root(app_root: &Path, path: PathBuf) -> PathBuf {
    let joined = app_root.join(path);
    std::path::absolute(&joined).unwrap_or(joined)
}

/// Filesystem layout of the application, tool repository and host install.
#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub app_root: PathBuf,
    /// Checkout of the rigging tool (contains `run.py` and `src/`)
    pub tool_repo: PathBuf,
    pub host_install_dir: PathBuf,
    pub host_version_dir: String,
    /// `<app_root>/local_bin`, prepended to PATH and probed for a host symlink
    pub local_bin: PathBuf,
    pub system_symlink: PathBuf,
    pub setup_script: PathBuf,
    /// Where finished artifacts are persisted after a run's temp dir is removed
    pub output_dir: PathBuf,
}

impl PathsConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        let app_root = env_optional(path_keys::RIGBRIDGE_APP_ROOT, &[])
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let app_root = std::path::absolute(&app_root).unwrap_or(app_root);
        Self::for_app_root(app_root)
    }

    /// Layout rooted at `app_root`, with env overrides applied per field.
    pub fn for_app_root(app_root: PathBuf) -> Self {
        let tool_repo = env_optional(path_keys::RIGBRIDGE_TOOL_REPO, path_keys::TOOL_REPO_ALIASES)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("UniRig"));
        let tool_repo = under_app_root(&app_root, tool_repo);
        let host_install_dir = env_optional(
            path_keys::RIGBRIDGE_HOST_INSTALL_DIR,
            path_keys::HOST_INSTALL_DIR_ALIASES,
        )
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("blender_installation").join(DEFAULT_HOST_RELEASE));
        let host_install_dir = under_app_root(&app_root, host_install_dir);
        let host_version_dir = env_or(path_keys::RIGBRIDGE_HOST_VERSION_DIR, &[], || {
            DEFAULT_HOST_VERSION_DIR.to_string()
        });
        let system_symlink = PathBuf::from(env_or(path_keys::RIGBRIDGE_HOST_SYMLINK, &[], || {
            DEFAULT_HOST_SYMLINK.to_string()
        }));
        let setup_script = env_optional(path_keys::RIGBRIDGE_SETUP_SCRIPT, &[])
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("setup_blender.sh"));
        let setup_script = under_app_root(&app_root, setup_script);
        let output_dir = env_optional(path_keys::RIGBRIDGE_OUTPUT_DIR, &[])
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::cache_dir()
                    .unwrap_or_else(|| app_root.join(".cache"))
                    .join("rigbridge")
                    .join("outputs")
            });

        Self {
            local_bin: app_root.join("local_bin"),
            app_root,
            tool_repo,
            host_install_dir,
            host_version_dir,
            system_symlink,
            setup_script,
            output_dir,
        }
    }

    /// `<install>/<ver>/python`: the host's bundled interpreter tree.
    pub fn host_python_dir(&self) -> PathBuf {
        self.host_install_dir
            .join(&self.host_version_dir)
            .join("python")
    }

    /// Tool entry script (`<tool_repo>/run.py`).
    pub fn tool_entry(&self) -> PathBuf {
        self.tool_repo.join("run.py")
    }
}

/// Subprocess time budgets.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    /// Per pipeline stage (default 1800)
    pub stage_secs: u64,
    /// Startup import smoke test (default 30)
    pub smoke_secs: u64,
    /// One-time host setup script (default 1800)
    pub setup_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            stage_secs: 1800,
            smoke_secs: 30,
            setup_secs: 1800,
        }
    }
}

impl TimeoutConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        let d = Self::default();
        Self {
            stage_secs: env_u64(timeout_keys::RIGBRIDGE_STAGE_TIMEOUT_SECS, &[], d.stage_secs),
            smoke_secs: env_u64(timeout_keys::RIGBRIDGE_SMOKE_TIMEOUT_SECS, &[], d.smoke_secs),
            setup_secs: env_u64(timeout_keys::RIGBRIDGE_SETUP_TIMEOUT_SECS, &[], d.setup_secs),
        }
    }
}

/// Pipeline behaviour switches.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Run the advisory environment diagnostic before the tool stages
    pub run_diagnostic: bool,
    /// Forward child stderr to our stderr while a stage runs
    pub stream_stderr: bool,
    /// Raw device selector: `auto`, `cpu` or `cuda:N`
    pub device: String,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        Self {
            run_diagnostic: env_bool(pipe_keys::RIGBRIDGE_RUN_DIAGNOSTIC, &[], true),
            stream_stderr: env_bool(pipe_keys::RIGBRIDGE_STREAM_STDERR, &[], false),
            device: env_or(pipe_keys::RIGBRIDGE_DEVICE, &[], || {
                DEFAULT_DEVICE_SELECTOR.to_string()
            }),
        }
    }
}

/// HTTP upload surface.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub listen: String,
    pub max_upload_mb: u64,
}

impl ServeConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        Self {
            listen: env_or(serve_keys::RIGBRIDGE_LISTEN, &[], || "127.0.0.1:7860".to_string()),
            max_upload_mb: env_u64(serve_keys::RIGBRIDGE_MAX_UPLOAD_MB, &[], 256),
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        (self.max_upload_mb as usize).saturating_mul(1024 * 1024)
    }
}

/// Observability: quiet, log_level, log_json, audit_log
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
    pub audit_log: Option<String>,
}

impl ObservabilityConfig {
    pub fn from_env() -> &'static Self {
        use std::sync::OnceLock;
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| {
            load_dotenv();
            Self {
                quiet: env_bool(obv_keys::RIGBRIDGE_QUIET, &[], false),
                log_level: env_or(obv_keys::RIGBRIDGE_LOG_LEVEL, &[], || {
                    "rigbridge=info".to_string()
                }),
                log_json: env_bool(obv_keys::RIGBRIDGE_LOG_JSON, &[], false),
                audit_log: env_optional(obv_keys::RIGBRIDGE_AUDIT_LOG, &[]),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_defaults_follow_app_root() {
        let root = PathBuf::from("/srv/app");
        let paths = PathsConfig::for_app_root(root.clone());
        assert_eq!(paths.local_bin, root.join("local_bin"));
        if std::env::var(path_keys::RIGBRIDGE_TOOL_REPO).is_err()
            && std::env::var("UNIRIG_REPO_DIR").is_err()
        {
            assert_eq!(paths.tool_repo, root.join("UniRig"));
            assert_eq!(paths.tool_entry(), root.join("UniRig").join("run.py"));
        }
    }

    #[test]
    fn test_relative_overrides_resolve_under_app_root() {
        let root = PathBuf::from("/srv/app");
        assert_eq!(
            under_app_root(&root, PathBuf::from("UniRig")),
            PathBuf::from("/srv/app/UniRig")
        );
        assert_eq!(
            under_app_root(&root, PathBuf::from("/opt/UniRig")),
            PathBuf::from("/opt/UniRig")
        );

        let relative_root = under_app_root(Path::new("app"), PathBuf::from("UniRig"));
        assert!(relative_root.is_absolute());
        assert!(relative_root.ends_with("app/UniRig"));
    }

    #[test]
    fn test_host_python_dir_uses_version_dir() {
        let mut paths = PathsConfig::for_app_root(PathBuf::from("/srv/app"));
        paths.host_install_dir = PathBuf::from("/opt/host");
        paths.host_version_dir = "4.2".to_string();
        assert_eq!(paths.host_python_dir(), PathBuf::from("/opt/host/4.2/python"));
    }

    #[test]
    fn test_timeout_defaults() {
        let t = TimeoutConfig::default();
        assert_eq!((t.stage_secs, t.smoke_secs, t.setup_secs), (1800, 30, 1800));
    }
}
