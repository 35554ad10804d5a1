//! Slicer CLI Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Command-line host for the slicer connector:
//!
//! - **Planning**: show the partitions a table splits into (`slicer plan`)
//! - **Copying**: stream a table into another through the partition source
//!   (`slicer copy`)
//! - **Checkpoints**: inspect a task's stored completion state
//!   (`slicer checkpoint show`)
//!
//! Flags override `SLICER_*` environment variables, which override defaults.

pub mod commands;
pub mod output;

use clap::{Args, Parser, Subcommand, ValueEnum};
use slicer::{DatabaseConfig, SourceConfig, WriteMode};

/// Slicer - range-partitioned table connector
#[derive(Parser, Debug)]
#[command(name = "slicer")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the partitions a table is split into
    Plan {
        #[command(flatten)]
        source: SourceArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Copy a table into another, partition by partition
    Copy {
        #[command(flatten)]
        source: SourceArgs,

        /// Target table
        #[arg(long)]
        target: String,

        /// How rows are applied to the target
        #[arg(long, default_value_t = WriteMode::Insert)]
        mode: WriteMode,

        /// Key columns matched by upsert (comma-separated)
        #[arg(long = "key", value_delimiter = ',')]
        keys: Vec<String>,

        /// Checkpoint identity (defaults to copy-<table>-<target>)
        #[arg(long)]
        task_id: Option<String>,

        /// Partitions processed at once
        #[arg(short, long, default_value_t = 4)]
        concurrency: usize,

        /// Attempts per partition before the copy is aborted
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,
    },

    /// Inspect stored checkpoints
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum CheckpointCommand {
    /// Print the partitions a task has not completed
    Show {
        /// Task identity the checkpoint is stored under
        task_id: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Source table selection, layered over `SLICER_SOURCE_*`
#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Source table (optionally schema-qualified)
    #[arg(long)]
    pub table: Option<String>,

    /// Integer id column partitions are cut on
    #[arg(long)]
    pub id_column: Option<String>,

    /// Smallest id to include (defaults to MIN(id))
    #[arg(long, allow_negative_numbers = true)]
    pub lower_bound: Option<i64>,

    /// Largest id to include (defaults to MAX(id))
    #[arg(long, allow_negative_numbers = true)]
    pub upper_bound: Option<i64>,

    /// Ids per partition
    #[arg(long)]
    pub rows_per_partition: Option<i64>,
}

impl SourceArgs {
    /// Apply the flags that were given on top of `config`
    pub fn apply(&self, mut config: SourceConfig) -> SourceConfig {
        if let Some(table) = &self.table {
            config.table = table.clone();
        }
        if let Some(id_column) = &self.id_column {
            config.id_column = id_column.clone();
        }
        if self.lower_bound.is_some() {
            config.lower_bound = self.lower_bound;
        }
        if self.upper_bound.is_some() {
            config.upper_bound = self.upper_bound;
        }
        if let Some(stride) = self.rows_per_partition {
            config.rows_per_partition = stride;
        }
        config
    }
}

impl Cli {
    /// Database settings from the environment with the URL flag applied
    pub fn database_config(&self) -> slicer::Result<DatabaseConfig> {
        let mut config = DatabaseConfig::from_env()?;
        if let Some(url) = &self.database_url {
            config.url = url.clone();
        }
        Ok(config)
    }
}
