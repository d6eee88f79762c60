//! rigbridge CLI library.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use commands::AppContext;

/// Run the CLI: parse args, set up logging and config, dispatch.
pub fn run_cli() -> Result<()> {
    // `.env` first so clap's env fallbacks see it
    rigbridge_core::config::load_dotenv();
    let cli = Cli::parse();
    rigbridge_core::observability::init_tracing();
    let ctx = AppContext::from_env();

    match cli.command {
        Commands::Rig {
            input,
            output_dir,
            device,
            no_diagnostic,
        } => {
            commands::rig::cmd_rig(&ctx, &input, output_dir, device.as_deref(), no_diagnostic)?;
        }
        Commands::Check { diagnostic } => {
            commands::check::cmd_check(&ctx, diagnostic)?;
        }
        Commands::Serve { listen } => {
            commands::serve::cmd_serve(ctx, listen)?;
        }
    }
    Ok(())
}
