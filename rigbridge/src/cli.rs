use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// rigbridge - automatic rigging of .glb meshes through a host 3D application
#[derive(Parser, Debug)]
#[command(name = "rigbridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rig a mesh and print the path of the rigged .glb
    Rig {
        /// Input mesh (.glb)
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Directory for finished results (default: RIGBRIDGE_OUTPUT_DIR or the user cache dir)
        #[arg(long, value_name = "DIR", env = "RIGBRIDGE_OUTPUT_DIR")]
        output_dir: Option<PathBuf>,

        /// Compute device: auto, cpu or cuda:N (default: RIGBRIDGE_DEVICE or auto)
        #[arg(long, value_name = "DEVICE", env = "RIGBRIDGE_DEVICE")]
        device: Option<String>,

        /// Skip the environment diagnostic stage
        #[arg(long)]
        no_diagnostic: bool,
    },

    /// Resolve the host environment and report what was found
    Check {
        /// Also run the environment diagnostic script inside the host
        #[arg(long)]
        diagnostic: bool,
    },

    /// Serve the HTTP upload page
    Serve {
        /// Listen address (default: RIGBRIDGE_LISTEN or 127.0.0.1:7860)
        #[arg(long, value_name = "ADDR", env = "RIGBRIDGE_LISTEN")]
        listen: Option<String>,
    },
}
