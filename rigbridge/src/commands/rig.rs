use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rigbridge_pipeline::Pipeline;
use rigbridge_runner::CancelToken;

use super::AppContext;

/// `rigbridge rig`: resolve, run the pipeline once, print the result path.
pub fn cmd_rig(
    ctx: &AppContext,
    input: &Path,
    output_dir: Option<PathBuf>,
    device: Option<&str>,
    no_diagnostic: bool,
) -> Result<PathBuf> {
    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("Received Ctrl+C, cancelling running stage...");
        on_signal.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    let env = ctx
        .resolve()
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    let device = ctx.device(device)?;
    tracing::info!(
        host = %env.executable.display(),
        smoke_ok = env.smoke_ok,
        device = %device,
        "Host environment ready"
    );

    let options = ctx.pipeline_options(
        device,
        output_dir,
        ctx.pipeline.run_diagnostic && !no_diagnostic,
    );
    let pipeline = Pipeline::new(ctx.runner(&env), &env.repo_root, options);
    let output = pipeline
        .process_upload(input, &cancel)
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    println!("{}", output.display());
    Ok(output)
}
