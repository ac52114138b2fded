use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use fatmirror::core::{Orchestrator, ProgressFactory, ProgressMode};
use fatmirror::{config, context, logging};
use serde::Serialize;
use tracing::error;

#[derive(Parser, Serialize)]
#[command(name = "fatmirror")]
#[command(
    about = "Mirror a directory onto every mounted FAT device at once",
    long_about = None
)]
struct Cli {
    /// Source directory to copy
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(short = 'i', long)]
    source: Option<PathBuf>,

    /// Directory name created on each device
    #[serde(rename = "destination_name", skip_serializing_if = "Option::is_none")]
    #[arg(short = 'o', long = "dest-name")]
    dest_name: Option<String>,

    /// Filesystem type to target (vfat, exfat, ...)
    #[serde(rename = "filesystem", skip_serializing_if = "Option::is_none")]
    #[arg(short = 't', long = "fs-type")]
    fs_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    mount_table: Option<PathBuf>,

    /// Use these directories as devices instead of reading the mount table
    #[serde(rename = "simulated_mounts", skip_serializing_if = "Vec::is_empty")]
    #[arg(long = "simulate", value_name = "DIR")]
    simulate: Vec<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, value_enum)]
    progress: Option<ProgressMode>,

    /// Fsync every copied file
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    sync_files: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    preserve_timestamps: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(short, long, num_args = 0..=1, default_missing_value = "true")]
    verbose: Option<bool>,

    /// Emit logs as JSON
    #[serde(rename = "json_logs", skip_serializing_if = "Option::is_none")]
    #[arg(long = "json", num_args = 0..=1, default_missing_value = "true")]
    json: Option<bool>,

    /// Configuration file (defaults to /etc/fatmirror/config.toml)
    #[serde(skip)]
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match config::AppConfig::new(Some(&cli), cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let progress = ProgressFactory::new(config.progress);
    logging::init(logging::LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
        progress: progress.bars(),
    });

    match run(config, progress).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: config::AppConfig, progress: ProgressFactory) -> Result<()> {
    let ctx = context::AppContext::with_progress(config, progress);
    Orchestrator::new(ctx).run().await?;
    Ok(())
}
