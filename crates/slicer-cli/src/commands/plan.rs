//! `slicer plan` command implementation
//!
//! Prints the partitions a table would be split into without touching any
//! checkpoint.

use anyhow::{Context, Result};
use colored::Colorize;
use slicer::{plan_partitions, DatabaseConfig, PgConnectionPool, PostgresQueryBuilder, SourceConfig};
use tracing::info;

use crate::output::{partitions_table, to_json};
use crate::OutputFormat;

pub async fn run(database: &DatabaseConfig, source: &SourceConfig, format: OutputFormat) -> Result<()> {
    source.validate().context("Invalid source configuration")?;

    // Lazy: with both bounds configured no connection is ever opened
    let pool = PgConnectionPool::connect_lazy(database).context("Invalid database configuration")?;
    let partitions = plan_partitions(source, &pool, &PostgresQueryBuilder::new())
        .await
        .with_context(|| format!("Failed to plan partitions for {}", source.table))?;
    pool.inner().close().await;

    info!(table = %source.table, partitions = partitions.len(), "Planned partitions");

    match format {
        OutputFormat::Json => println!("{}", to_json(&partitions)?),
        OutputFormat::Table => {
            if partitions.is_empty() {
                println!("{}", format!("Table {} has no rows in range.", source.table).yellow());
                return Ok(());
            }
            println!("{}", partitions_table(&partitions));
            println!(
                "{} {} partitions of up to {} ids",
                "Total:".cyan().bold(),
                partitions.len(),
                source.rows_per_partition
            );
        }
    }

    Ok(())
}
