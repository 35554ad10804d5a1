//! `slicer checkpoint` command implementations

use anyhow::{Context, Result};
use colored::Colorize;
use slicer::{CheckpointLog, DatabaseConfig, PgCheckpointLog, PgConnectionPool};

use crate::output::{partitions_table, remaining_partitions, to_json};
use crate::OutputFormat;

/// Print the partitions a task has not completed
pub async fn show(database: &DatabaseConfig, task_id: &str, format: OutputFormat) -> Result<()> {
    let pool = PgConnectionPool::connect(database)
        .await
        .context("Failed to connect to database")?;
    let log = PgCheckpointLog::new(pool.inner().clone());
    log.ensure_table().await?;

    let stored = log
        .read(task_id)
        .await
        .with_context(|| format!("Failed to read checkpoint for task '{}'", task_id))?;
    pool.inner().close().await;

    let Some(completion) = stored else {
        match format {
            OutputFormat::Json => println!("null"),
            OutputFormat::Table => println!("No checkpoint stored for task '{}'.", task_id),
        }
        return Ok(());
    };

    match format {
        OutputFormat::Json => println!("{}", to_json(&completion)?),
        OutputFormat::Table => {
            let remaining = remaining_partitions(&completion);
            if remaining.is_empty() {
                println!("{}", format!("Task '{}' is complete.", task_id).green());
                return Ok(());
            }
            println!("{}", format!("Task '{}' incomplete partitions:", task_id).cyan().bold());
            println!("{}", partitions_table(&remaining));
        }
    }

    Ok(())
}
