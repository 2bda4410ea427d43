// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "booth-camera")]
#[command(about = "Camera control for Raspberry Pi photo booths")]
#[command(version)]
struct Cli {
    /// Configuration file (default: ~/.config/booth-camera/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the preview and report frame statistics
    Preview {
        /// How long to run (0 runs until Ctrl+C)
        #[arg(short, long, default_value = "10")]
        seconds: u64,
    },

    /// Take a photo
    Photo {
        /// Output file path (default: ~/Pictures/booth/photo_TIMESTAMP.jpg)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Run the preview this long before capturing
        #[arg(short, long, default_value = "0")]
        preview_seconds: u64,
    },

    /// Record a video
    Video {
        /// Recording duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Output file path (default: ~/Videos/booth/video_TIMESTAMP.mp4)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control the log level
    // Examples: RUST_LOG=debug, RUST_LOG=booth_camera=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = booth_camera::Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Preview { seconds } => cli::run_preview(config, seconds),
        Commands::Photo {
            output,
            preview_seconds,
        } => cli::take_photo(config, output, preview_seconds),
        Commands::Video { duration, output } => cli::record_video(config, duration, output),
        Commands::Config => cli::print_config(&config),
    }
}
