//! # Cogshell CLI
//!
//! This module contains the command-line interface definition and main entry point.

use super::modes;

use crate::{config::EngineConfig, types::Command, utils::logging::init_logging};
use anyhow::{Context, Result};
use clap::Parser;
use std::{path::PathBuf, process::ExitCode, time::Duration};

/// Cogshell: run a shell command safely and report its output as JSON.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about,
    long_about = "cogshell runs in three modes:

1. Streaming Mode (default): print one NDJSON event per output line, then the exit code.
   Example: cogshell -- cargo build --release

2. Sync Mode: run to completion and print a single {stdout, stderr, exit_code} object.
   Example: cogshell --sync -- ls -la

3. Auto-Debug Mode: stream, and on failure print an auto_debug_request announcement
   carrying the redacted failure context.
   Example: cogshell --auto-debug -- pytest

The process exit code mirrors the command's exit code (1 when it did not run)."
)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Timeout for the command in seconds (overrides the config file)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Working directory for the command (overrides the config file)
    #[arg(long)]
    pub working_directory: Option<PathBuf>,

    /// Run to completion and print one JSON result instead of streaming
    #[arg(long, conflicts_with = "auto_debug")]
    pub sync: bool,

    /// Hand failures to auto-debug instead of only reporting them
    #[arg(long)]
    pub auto_debug: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Log to stderr instead of file
    #[arg(long)]
    pub log_to_stderr: bool,

    /// The command to run, interpreted by the configured shell
    #[arg(
        value_name = "COMMAND",
        required = true,
        allow_hyphen_values = true,
        trailing_var_arg = true
    )]
    pub command: Vec<String>,
}

pub async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    let log_to_file = !cli.log_to_stderr;

    init_logging(log_level, log_to_file)?;

    let config = build_config(&cli)?;
    let command = Command::new(command_text(&cli)?);

    let exit_code = if cli.sync {
        tracing::info!("Running in sync mode");
        modes::run_sync_mode(config, &command).await?
    } else if cli.auto_debug {
        tracing::info!("Running in auto-debug mode");
        modes::run_handoff_mode(config, &command).await?
    } else {
        tracing::info!("Running in streaming mode");
        modes::run_stream_mode(config, &command).await?
    };

    Ok(ExitCode::from(process_exit_code(exit_code)))
}

/// Layer the configuration: defaults, then the config file, then flags.
pub fn build_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::default(),
    };

    if let Some(seconds) = cli.timeout {
        anyhow::ensure!(seconds > 0, "--timeout must be greater than zero");
        config.default_timeout_secs = seconds;
    }

    if let Some(dir) = &cli.working_directory {
        let dir = std::fs::canonicalize(dir)
            .with_context(|| format!("Failed to canonicalize working directory: {:?}", dir))?;
        config.working_dir = dir;
    }

    tracing::debug!(
        "Effective timeout {:?}, working directory {}",
        Duration::from_secs(config.default_timeout_secs),
        config.working_dir.display()
    );
    Ok(config)
}

/// The trailing arguments joined into one shell command line.
pub fn command_text(cli: &Cli) -> Result<String> {
    let text = cli.command.join(" ");
    anyhow::ensure!(!text.trim().is_empty(), "No command given");
    Ok(text)
}

/// Map a command exit code onto a process exit status.
///
/// Codes outside `0..=255` (not run, killed by a signal) become 1.
pub fn process_exit_code(exit_code: i32) -> u8 {
    u8::try_from(exit_code).unwrap_or(1)
}
