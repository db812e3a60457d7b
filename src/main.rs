//! Backup Test Tool
//!
//! Runs a sampled slice of the configured backup routine (app directories and
//! database dumps) and exits non-zero when any part of it fails.

// backuptest/src/main.rs
mod backup;
mod config;
mod errors;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Exclusions, RawJsonConfig, load_test_config_from_json};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Exit status for a run that completed but did not pass.
const TEST_FAILED_EXIT_CODE: u8 = 2;

#[derive(Parser)]
#[command(
    name = "backuptest",
    version,
    about = "Validate the backup routine by running a sampled test backup"
)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Exclude application directories from this test
    #[arg(long)]
    no_app: bool,

    /// Exclude databases from this test
    #[arg(long)]
    no_db: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Main entry point for the backup test tool
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(&cli.log_level) {
        eprintln!("❌ Error: {:?}", e);
        return ExitCode::FAILURE;
    }

    match run_app(&cli).await {
        Ok(true) => {
            info!("✅ Test backup passed.");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            error!("❌ Test backup failed.");
            ExitCode::from(TEST_FAILED_EXIT_CODE)
        }
        Err(e) => {
            error!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: &Cli) -> Result<bool> {
    let raw_config = RawJsonConfig::load_from_json(&cli.config).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            cli.config.display()
        )
    })?;
    let exclusions = Exclusions {
        no_app: cli.no_app,
        no_db: cli.no_db,
    };
    let test_config = load_test_config_from_json(&raw_config, exclusions)
        .context("Failed to load test backup configuration from JSON")?;

    let report = backup::run_test_flow(&test_config).await;
    Ok(report.verdict())
}
