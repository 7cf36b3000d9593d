//! dupcap CLI
//!
//! Desktop duplication capture from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Check whether the desktop can be captured
//! dupcap probe
//!
//! # List outputs
//! dupcap outputs --json
//!
//! # Capture 120 planar YUV frames into a file
//! dupcap capture --format yuv420 --frames 120 --out frames.yuv
//!
//! # Try the pipeline without a display
//! dupcap capture --synthetic 640x480 --frames 10
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// dupcap - desktop duplication capture
#[derive(Parser)]
#[command(name = "dupcap")]
#[command(version)]
#[command(about = "Desktop duplication capture: raw BGRA, YUV 4:2:0 and H.264 frames", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether the desktop can be captured right now
    Probe(commands::ProbeArgs),

    /// List display outputs
    #[command(alias = "ls")]
    Outputs(commands::OutputsArgs),

    /// Capture frames from an output
    Capture(commands::CaptureArgs),

    /// Manage the configuration file
    Config(commands::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // "dupcap" also covers the dupcap_core target
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(format!("dupcap={}", level).parse()?),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Probe(args) => commands::probe(args),
        Commands::Outputs(args) => commands::outputs(args),
        Commands::Capture(args) => commands::capture(args).await,
        Commands::Config(args) => commands::config(args),
    }
}
