use anyhow::Result;
use rigbridge_pipeline::diagnostic;
use rigbridge_pipeline::{Stage, StageExecutor, StageInvocation};
use rigbridge_runner::{CancelToken, InterpreterEnvironment};

use super::AppContext;

fn join_paths(paths: &[std::path::PathBuf]) -> String {
    if paths.is_empty() {
        return "(none)".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Human-readable environment report.
pub fn render_report(ctx: &AppContext, env: &InterpreterEnvironment, device: &str) -> String {
    let mut lines = vec![
        format!("Host executable : {}", env.executable.display()),
        format!("Import smoke    : {}", if env.smoke_ok { "ok" } else { "FAILED" }),
        format!("Tool repository : {}", env.repo_root.display()),
        format!("Module paths    : {}", join_paths(&env.module_paths)),
        format!("Library paths   : {}", join_paths(&env.library_paths)),
    ];
    if let Some(bin) = &env.exec_path_prefix {
        lines.push(format!("PATH prefix     : {}", bin.display()));
    }
    lines.push(format!("Device          : {device}"));
    lines.push(format!("Output dir      : {}", ctx.paths.output_dir.display()));
    lines.push(format!("Stage timeout   : {}s", ctx.timeouts.stage_secs));
    lines.join("\n")
}

/// `rigbridge check`: resolve the host and print what was found.
pub fn cmd_check(ctx: &AppContext, run_diagnostic: bool) -> Result<()> {
    let env = ctx
        .resolve()
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    let device = ctx.device(None)?;
    println!("{}", render_report(ctx, &env, &device.to_string()));

    if run_diagnostic {
        let scratch = tempfile::Builder::new().prefix("rigbridge_check_").tempdir()?;
        let script = diagnostic::write_script(scratch.path(), &env.repo_root)
            .map_err(|e| anyhow::anyhow!(e.user_message()))?;
        let result = ctx
            .runner(&env)
            .execute(&StageInvocation::diagnostic(script), &CancelToken::new());
        match result {
            Ok(r) => {
                println!();
                println!("{}", r.stdout.trim_end());
            }
            Err(e) => anyhow::bail!("{} failed: {}", Stage::Diagnostic.name(), e),
        }
    }

    if !env.smoke_ok {
        tracing::warn!("Host could not import its native module; stages will likely fail");
    }
    Ok(())
}
