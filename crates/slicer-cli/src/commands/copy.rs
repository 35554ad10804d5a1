//! `slicer copy` command implementation
//!
//! Runs a full partition pipeline: each delivered partition is read from the
//! source table, written to the target in one transaction, then acknowledged.
//! A failed partition is retried until it exhausts `max_attempts`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use futures::stream::{self, StreamExt};
use slicer::writer::from_config;
use slicer::{
    ConnectionPool, DatabaseConfig, Partition, PartitionReader, PartitionSource, PgCheckpointLog,
    PgConnectionPool, Pipeline, PostgresQueryBuilder, QueryBuilder, SourceConfig, TaskContext,
    WorkItem, WriteMessage, WriterConfig,
};
use tracing::{info, warn};

use crate::output::create_spinner;

/// Options for one copy run
#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub task_id: String,
    pub concurrency: usize,
    pub max_attempts: u32,
}

/// What a finished copy moved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopySummary {
    pub partitions: u64,
    pub rows: u64,
    pub retries: u64,
}

/// Default checkpoint identity for copying `table` into `target`
pub fn default_task_id(table: &str, target: &str) -> String {
    format!("copy-{}-{}", table, target)
}

pub async fn run(
    database: &DatabaseConfig,
    source: SourceConfig,
    writer: WriterConfig,
    options: CopyOptions,
) -> Result<CopySummary> {
    if options.concurrency == 0 {
        bail!("concurrency must be greater than 0");
    }
    if options.max_attempts == 0 {
        bail!("max_attempts must be greater than 0");
    }
    source.validate().context("Invalid source configuration")?;
    writer.validate().context("Invalid target configuration")?;

    let pg = PgConnectionPool::connect(database)
        .await
        .context("Failed to connect to database")?;
    let checkpoints = PgCheckpointLog::new(pg.inner().clone());
    checkpoints
        .ensure_table()
        .await
        .context("Failed to prepare checkpoint table")?;

    let pool: Arc<dyn ConnectionPool> = Arc::new(pg);
    let builder: Arc<dyn QueryBuilder> = Arc::new(PostgresQueryBuilder::new());

    info!(
        task_id = %options.task_id,
        source = %source.table,
        target = %writer.table,
        mode = %writer.mode,
        concurrency = options.concurrency,
        "Starting copy"
    );

    let output = from_config(&writer, pool.clone(), builder.clone())?;
    let reader = PartitionReader::new(pool.clone(), builder.clone());
    let partitions = PartitionSource::start(
        TaskContext::new(options.task_id.clone(), source, Arc::new(checkpoints)),
        pool,
        builder,
    )
    .await
    .context("Failed to start partition source")?;

    let spinner = create_spinner(&format!("Copying into {}", writer.table));
    let outcome = copy_all(&partitions, &reader, output.as_ref(), &options, |summary| {
        spinner.set_message(format!(
            "{} partitions, {} rows copied into {}",
            summary.partitions, summary.rows, writer.table
        ));
    })
    .await;
    spinner.finish_and_clear();

    // Flush the checkpoint even when the copy failed, so finished work is kept
    let closed = partitions.shutdown().await;
    let summary = outcome?;
    closed.context("Failed to flush checkpoint")?;

    println!(
        "{} {} partitions, {} rows copied into {} ({} retries)",
        "Done:".green().bold(),
        summary.partitions,
        summary.rows,
        writer.table,
        summary.retries
    );
    info!(
        task_id = %options.task_id,
        partitions = summary.partitions,
        rows = summary.rows,
        retries = summary.retries,
        "Copy complete"
    );

    Ok(summary)
}

/// Pull, process and acknowledge until the source is drained
pub async fn copy_all<F>(
    source: &PartitionSource,
    reader: &PartitionReader,
    output: &dyn Pipeline,
    options: &CopyOptions,
    mut on_progress: F,
) -> Result<CopySummary>
where
    F: FnMut(&CopySummary),
{
    let mut summary = CopySummary::default();
    let mut attempts: HashMap<Partition, u32> = HashMap::new();

    while !source.is_drained() {
        let batch = source.read_batch(options.concurrency).await?;

        let results: Vec<_> = stream::iter(batch)
            .map(|message| async move {
                let outcome = match &message.item {
                    WorkItem::Partition(partition) => Some(copy_partition(reader, output, partition).await),
                    WorkItem::Done => None,
                };
                (message, outcome)
            })
            .buffer_unordered(options.concurrency)
            .collect()
            .await;

        for (message, outcome) in results {
            match (message.item, outcome) {
                (WorkItem::Partition(_), Some(Ok(rows))) => {
                    source.ack(&message.id).await?;
                    summary.partitions += 1;
                    summary.rows += rows;
                }
                (WorkItem::Partition(partition), Some(Err(e))) => {
                    let tries = attempts.entry(partition.clone()).or_insert(0);
                    *tries += 1;
                    if *tries >= options.max_attempts {
                        return Err(e.context(format!(
                            "Partition {} failed {} times",
                            partition, tries
                        )));
                    }
                    warn!(partition = %partition, attempt = *tries, error = %e, "Partition failed, retrying");
                    source.retry(&message.id).await?;
                    summary.retries += 1;
                }
                (WorkItem::Done, _) if source.is_drained() => {}
                // Partitions are still in flight: hand the terminal item back
                (WorkItem::Done, _) => {
                    source.retry(&message.id).await?;
                }
                (WorkItem::Partition(partition), None) => {
                    bail!("Partition {} was not processed", partition);
                }
            }
        }

        on_progress(&summary);
    }

    Ok(summary)
}

async fn copy_partition(reader: &PartitionReader, output: &dyn Pipeline, partition: &Partition) -> Result<u64> {
    let rows = reader
        .read_rows(partition)
        .await
        .with_context(|| format!("Failed to read {}", partition))?;
    let count = rows.len() as u64;
    let committed = output
        .write_batch(&WriteMessage::rows(rows))
        .await
        .with_context(|| format!("Failed to write {}", partition))?;
    if !committed {
        bail!("Write of {} was not acknowledged", partition);
    }
    Ok(count)
}
