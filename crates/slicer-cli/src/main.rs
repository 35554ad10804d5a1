//! Slicer CLI - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use slicer::{SourceConfig, WriterConfig};
use slicer_cli::commands::{self, copy::CopyOptions};
use slicer_cli::{CheckpointCommand, Cli, Commands};
use slicer_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Warn })
        .output(LogOutput::Console)
        .log_file_prefix("slicer".to_string())
        .build();

    // Environment variables take precedence over flags
    let log_config = match log_config.clone().merge_env() {
        Ok(merged) => merged,
        Err(e) => {
            eprintln!("Warning: ignoring invalid logging settings: {:#}", e);
            log_config
        }
    };

    // The CLI works without logging, so a failed init is not fatal
    let _guard = init_logging(&log_config).ok();

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn execute_command(cli: &Cli) -> Result<()> {
    let database = cli.database_config().context("Invalid database settings")?;

    match &cli.command {
        Commands::Plan { source, format } => {
            let config = source.apply(SourceConfig::from_env()?);
            commands::plan::run(&database, &config, *format).await
        }
        Commands::Copy {
            source,
            target,
            mode,
            keys,
            task_id,
            concurrency,
            max_attempts,
        } => {
            let source = source.apply(SourceConfig::from_env()?);
            let writer = WriterConfig {
                table: target.clone(),
                mode: *mode,
                key_columns: keys.clone(),
            };
            let options = CopyOptions {
                task_id: task_id
                    .clone()
                    .unwrap_or_else(|| commands::copy::default_task_id(&source.table, target)),
                concurrency: *concurrency,
                max_attempts: *max_attempts,
            };
            commands::copy::run(&database, source, writer, options)
                .await
                .map(|_| ())
        }
        Commands::Checkpoint { command } => match command {
            CheckpointCommand::Show { task_id, format } => {
                commands::checkpoint::show(&database, task_id, *format).await
            }
        },
    }
}
