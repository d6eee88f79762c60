//! Command handlers and the startup context they share.

pub mod check;
pub mod rig;
pub mod serve;

use std::path::PathBuf;
use std::time::Duration;

use rigbridge_core::config::{PathsConfig, PipelineConfig, TimeoutConfig};
use rigbridge_pipeline::{fixup, PipelineOptions, RigError};
use rigbridge_runner::{resolve, Device, InterpreterEnvironment, ResolverConfig, SubprocessRunner};

/// Configuration loaded once per process and handed to every command.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub paths: PathsConfig,
    pub timeouts: TimeoutConfig,
    pub pipeline: PipelineConfig,
}

impl AppContext {
    pub fn from_env() -> Self {
        Self {
            paths: PathsConfig::from_env(),
            timeouts: TimeoutConfig::from_env(),
            pipeline: PipelineConfig::from_env(),
        }
    }

    /// Tool repository and its entry script must exist before anything runs.
    pub fn check_tool_repo(&self) -> Result<(), String> {
        if !self.paths.tool_repo.is_dir() {
            return Err(format!(
                "CRITICAL STARTUP ERROR: tool repository not found at {}.",
                self.paths.tool_repo.display()
            ));
        }
        let entry = self.paths.tool_entry();
        if !entry.is_file() {
            return Err(format!(
                "CRITICAL STARTUP ERROR: tool entry script not found at {}.",
                entry.display()
            ));
        }
        Ok(())
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig::from_config(&self.paths, &self.timeouts)
    }

    /// Tool repo check and source fixup, then host resolution (may run the
    /// setup script). The fixup runs here, once per process, so no stage is
    /// importing `asset.py` while it is rewritten.
    pub fn resolve(&self) -> Result<InterpreterEnvironment, RigError> {
        self.check_tool_repo().map_err(RigError::EnvironmentUnavailable)?;
        fixup::apply_logged(&self.paths.tool_repo);
        Ok(resolve(&self.resolver_config())?)
    }

    pub fn runner<'a>(&self, env: &'a InterpreterEnvironment) -> SubprocessRunner<'a> {
        SubprocessRunner::new(env)
            .with_timeout(Duration::from_secs(self.timeouts.stage_secs))
            .with_stream_stderr(self.pipeline.stream_stderr)
    }

    /// CLI value wins over `RIGBRIDGE_DEVICE`; `auto` probes the machine.
    pub fn device(&self, selector: Option<&str>) -> anyhow::Result<Device> {
        let selector = selector.unwrap_or(&self.pipeline.device);
        Ok(Device::from_selector(selector)?)
    }

    pub fn pipeline_options(
        &self,
        device: Device,
        output_dir: Option<PathBuf>,
        run_diagnostic: bool,
    ) -> PipelineOptions {
        let mut options =
            PipelineOptions::new(output_dir.unwrap_or_else(|| self.paths.output_dir.clone()));
        options.device = device;
        options.run_diagnostic = run_diagnostic;
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn context_in(root: &std::path::Path) -> AppContext {
        let mut paths = PathsConfig::for_app_root(root.to_path_buf());
        paths.tool_repo = root.join("UniRig");
        AppContext {
            paths,
            timeouts: TimeoutConfig::default(),
            pipeline: PipelineConfig {
                run_diagnostic: true,
                stream_stderr: false,
                device: "cpu".to_string(),
            },
        }
    }

    #[test]
    fn test_check_tool_repo() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context_in(tmp.path());
        assert!(ctx.check_tool_repo().unwrap_err().contains("tool repository not found"));

        fs::create_dir_all(&ctx.paths.tool_repo).unwrap();
        assert!(ctx.check_tool_repo().unwrap_err().contains("entry script not found"));

        fs::write(ctx.paths.tool_entry(), "").unwrap();
        assert!(ctx.check_tool_repo().is_ok());
    }

    #[test]
    fn test_resolve_fails_before_probing_without_repo() {
        let tmp = tempfile::tempdir().unwrap();
        let err = context_in(tmp.path()).resolve().unwrap_err();
        assert!(err.is_environment());
    }

    #[test]
    fn test_resolve_applies_source_fixup_once_repo_checks_pass() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context_in(tmp.path());
        ctx.paths.system_symlink = tmp.path().join("no_host");
        ctx.paths.setup_script = tmp.path().join("no_setup.sh");
        fs::create_dir_all(&ctx.paths.tool_repo).unwrap();
        fs::write(ctx.paths.tool_entry(), "").unwrap();
        let asset = fixup::asset_py_path(&ctx.paths.tool_repo);
        fs::create_dir_all(asset.parent().unwrap()).unwrap();
        fs::write(&asset, "from typing import Union, Dict\nmeta: Union[Dict[str, ...], None]=None\n")
            .unwrap();

        // No host and no setup script: resolution fails after the fixup ran.
        assert!(ctx.resolve().unwrap_err().is_environment());
        let patched = fs::read_to_string(&asset).unwrap();
        assert!(patched.contains("meta: Union[Dict[str, Any], None]=None"));
        assert!(patched.contains("from typing import Any"));
    }

    #[test]
    fn test_default_device_selector_parses() {
        let device = Device::from_selector(rigbridge_core::config::schema::DEFAULT_DEVICE_SELECTOR)
            .unwrap();
        assert!(matches!(device, Device::Cpu | Device::Cuda(0)));
    }

    #[test]
    fn test_device_and_options() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context_in(tmp.path());
        assert_eq!(ctx.device(None).unwrap(), Device::Cpu);
        assert_eq!(ctx.device(Some("cuda:1")).unwrap(), Device::Cuda(1));
        assert!(ctx.device(Some("tpu")).is_err());

        let opts = ctx.pipeline_options(Device::Cuda(0), Some(tmp.path().join("o")), false);
        assert_eq!(opts.output_dir, tmp.path().join("o"));
        assert!(!opts.run_diagnostic);
        let opts = ctx.pipeline_options(Device::Cpu, None, true);
        assert_eq!(opts.output_dir, ctx.paths.output_dir);
    }
}
