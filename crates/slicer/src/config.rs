//! Connector configuration
//!
//! Settings for the partition source, the table writers and the database
//! connection, loaded from `SLICER_*` / `DATABASE_*` environment variables
//! (a `.env` file is honoured) with the defaults below.

use serde::{Deserialize, Serialize};
use slicer_common::env;
use std::time::Duration;

use crate::error::{ConnectorError, Result};

// ============================================================================
// Source Defaults
// ============================================================================

/// Default id column used to partition the source table.
pub const DEFAULT_ID_COLUMN: &str = "id";

/// Default number of ids covered by one partition.
pub const DEFAULT_ROWS_PER_PARTITION: i64 = 1000;

/// Default capacity of the work queue.
pub const DEFAULT_WORK_BUFFER_SIZE: usize = 1000;

/// Default capacity of the acknowledgement channel.
pub const DEFAULT_ACK_BUFFER_SIZE: usize = 1000;

/// Default period between checkpoint writes, in milliseconds.
pub const DEFAULT_CHECKPOINT_INTERVAL_MS: u64 = 5000;

/// Default cap on partitions handed out and not yet acked or retried.
pub const DEFAULT_MAX_PENDING: usize = 10_000;

/// Default number of items pulled per `read_batch`.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Default wait for one item on the work queue, in milliseconds.
pub const DEFAULT_PULL_TIMEOUT_MS: u64 = 50;

/// Default wait for room on the acknowledgement channel, in milliseconds.
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 5000;

// ============================================================================
// Database Defaults
// ============================================================================

pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/slicer";
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Partition source settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    /// Table to partition
    pub table: String,
    /// Integer column the partitions range over
    pub id_column: String,
    /// Overrides `MIN(id_column)` when set
    pub lower_bound: Option<i64>,
    /// Overrides `MAX(id_column)` when set
    pub upper_bound: Option<i64>,
    /// Stride between partition boundaries
    pub rows_per_partition: i64,
    pub work_buffer_size: usize,
    pub ack_buffer_size: usize,
    pub checkpoint_interval_ms: u64,
    pub max_pending: usize,
    pub batch_size: usize,
    pub pull_timeout_ms: u64,
    pub ack_timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            table: String::new(),
            id_column: DEFAULT_ID_COLUMN.to_string(),
            lower_bound: None,
            upper_bound: None,
            rows_per_partition: DEFAULT_ROWS_PER_PARTITION,
            work_buffer_size: DEFAULT_WORK_BUFFER_SIZE,
            ack_buffer_size: DEFAULT_ACK_BUFFER_SIZE,
            checkpoint_interval_ms: DEFAULT_CHECKPOINT_INTERVAL_MS,
            max_pending: DEFAULT_MAX_PENDING,
            batch_size: DEFAULT_BATCH_SIZE,
            pull_timeout_ms: DEFAULT_PULL_TIMEOUT_MS,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
        }
    }
}

impl SourceConfig {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    /// Load from `SLICER_SOURCE_*` variables without validating
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            table: env::string_or("SLICER_SOURCE_TABLE", ""),
            id_column: env::string_or("SLICER_SOURCE_ID_COLUMN", DEFAULT_ID_COLUMN),
            lower_bound: env::parse_opt("SLICER_SOURCE_LOWER_BOUND")?,
            upper_bound: env::parse_opt("SLICER_SOURCE_UPPER_BOUND")?,
            rows_per_partition: env::parse_or(
                "SLICER_SOURCE_ROWS_PER_PARTITION",
                defaults.rows_per_partition,
            )?,
            work_buffer_size: env::parse_or("SLICER_SOURCE_WORK_BUFFER_SIZE", defaults.work_buffer_size)?,
            ack_buffer_size: env::parse_or("SLICER_SOURCE_ACK_BUFFER_SIZE", defaults.ack_buffer_size)?,
            checkpoint_interval_ms: env::parse_or(
                "SLICER_SOURCE_CHECKPOINT_INTERVAL_MS",
                defaults.checkpoint_interval_ms,
            )?,
            max_pending: env::parse_or("SLICER_SOURCE_MAX_PENDING", defaults.max_pending)?,
            batch_size: env::parse_or("SLICER_SOURCE_BATCH_SIZE", defaults.batch_size)?,
            pull_timeout_ms: env::parse_or("SLICER_SOURCE_PULL_TIMEOUT_MS", defaults.pull_timeout_ms)?,
            ack_timeout_ms: env::parse_or("SLICER_SOURCE_ACK_TIMEOUT_MS", defaults.ack_timeout_ms)?,
        })
    }

    pub fn with_bounds(mut self, lower: i64, upper: i64) -> Self {
        self.lower_bound = Some(lower);
        self.upper_bound = Some(upper);
        self
    }

    pub fn with_rows_per_partition(mut self, stride: i64) -> Self {
        self.rows_per_partition = stride;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.table.trim().is_empty() {
            return Err(ConnectorError::config("source table cannot be empty"));
        }
        if self.id_column.trim().is_empty() {
            return Err(ConnectorError::config("source id column cannot be empty"));
        }
        if self.rows_per_partition <= 0 {
            return Err(ConnectorError::config(format!(
                "rows_per_partition must be greater than 0, got {}",
                self.rows_per_partition
            )));
        }
        if let (Some(lower), Some(upper)) = (self.lower_bound, self.upper_bound) {
            if lower > upper {
                return Err(ConnectorError::config(format!(
                    "lower_bound ({}) cannot be greater than upper_bound ({})",
                    lower, upper
                )));
            }
        }
        for (name, value) in [
            ("work_buffer_size", self.work_buffer_size),
            ("ack_buffer_size", self.ack_buffer_size),
            ("max_pending", self.max_pending),
            ("batch_size", self.batch_size),
        ] {
            if value == 0 {
                return Err(ConnectorError::config(format!("{} must be greater than 0", name)));
            }
        }
        if self.checkpoint_interval_ms == 0 {
            return Err(ConnectorError::config("checkpoint_interval_ms must be greater than 0"));
        }
        Ok(())
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.pull_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// How result rows are applied to the target table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    Insert,
    /// Update by predicate, inserting when nothing matched
    Upsert,
}

impl std::str::FromStr for WriteMode {
    type Err = ConnectorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insert" => Ok(WriteMode::Insert),
            "upsert" => Ok(WriteMode::Upsert),
            _ => Err(ConnectorError::config(format!(
                "invalid write mode '{}', expected 'insert' or 'upsert'",
                s
            ))),
        }
    }
}

impl std::fmt::Display for WriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteMode::Insert => f.write_str("insert"),
            WriteMode::Upsert => f.write_str("upsert"),
        }
    }
}

/// Table writer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WriterConfig {
    pub table: String,
    pub mode: WriteMode,
    /// Columns forming the upsert predicate
    pub key_columns: Vec<String>,
}

impl WriterConfig {
    /// Load from `SLICER_WRITER_*` variables without validating
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            table: env::string_or("SLICER_WRITER_TABLE", ""),
            mode: env::parse_or("SLICER_WRITER_MODE", WriteMode::default())?,
            key_columns: env::string_or("SLICER_WRITER_KEY_COLUMNS", "")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.table.trim().is_empty() {
            return Err(ConnectorError::config("writer table cannot be empty"));
        }
        if self.mode == WriteMode::Upsert && self.key_columns.is_empty() {
            return Err(ConnectorError::config("upsert mode requires at least one key column"));
        }
        Ok(())
    }
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::string_or("DATABASE_URL", DEFAULT_DATABASE_URL),
            max_connections: env::parse_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS)?,
            min_connections: env::parse_or("DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS)?,
            connect_timeout_secs: env::parse_or(
                "DATABASE_CONNECT_TIMEOUT",
                DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            )?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(ConnectorError::config("database URL cannot be empty"));
        }
        if self.max_connections == 0 {
            return Err(ConnectorError::config("database max_connections must be greater than 0"));
        }
        if self.min_connections > self.max_connections {
            return Err(ConnectorError::config(format!(
                "database min_connections ({}) cannot be greater than max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Everything a connector task needs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectorConfig {
    /// Identity the checkpoint is stored under
    pub task_id: String,
    pub database: DatabaseConfig,
    pub source: SourceConfig,
    pub writer: WriterConfig,
}

impl ConnectorConfig {
    /// Read `.env` and the environment, without validating
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            task_id: env::string_or("SLICER_TASK_ID", ""),
            database: DatabaseConfig::from_env()?,
            source: SourceConfig::from_env()?,
            writer: WriterConfig::from_env()?,
        })
    }

    /// Load and validate the whole configuration
    pub fn load() -> Result<Self> {
        let config = Self::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.task_id.trim().is_empty() {
            return Err(ConnectorError::config("SLICER_TASK_ID cannot be empty"));
        }
        self.database.validate()?;
        self.source.validate()?;
        self.writer.validate()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_source_config_default() {
        let config = SourceConfig::default();
        assert_eq!(config.id_column, "id");
        assert_eq!(config.rows_per_partition, 1000);
        assert_eq!(config.batch_size, 20);
        assert!(config.lower_bound.is_none());
    }

    #[test]
    fn test_source_config_validation_valid() {
        let config = SourceConfig::new("orders").with_bounds(1, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_source_config_validation_empty_table() {
        assert!(SourceConfig::default().validate().is_err());
    }

    #[test]
    fn test_source_config_validation_zero_stride() {
        let config = SourceConfig::new("orders").with_rows_per_partition(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_source_config_validation_inverted_bounds() {
        let config = SourceConfig::new("orders").with_bounds(10, 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_source_config_validation_zero_max_pending() {
        let config = SourceConfig {
            max_pending: 0,
            ..SourceConfig::new("orders")
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_pending"));
    }

    #[test]
    fn test_durations() {
        let config = SourceConfig {
            checkpoint_interval_ms: 1500,
            pull_timeout_ms: 10,
            ..SourceConfig::default()
        };
        assert_eq!(config.checkpoint_interval(), Duration::from_millis(1500));
        assert_eq!(config.pull_timeout(), Duration::from_millis(10));
    }

    #[test]
    fn test_write_mode_from_str() {
        assert_eq!("UPSERT".parse::<WriteMode>().unwrap(), WriteMode::Upsert);
        assert_eq!("insert".parse::<WriteMode>().unwrap(), WriteMode::Insert);
        assert!("merge".parse::<WriteMode>().is_err());
    }

    #[test]
    fn test_writer_config_upsert_requires_keys() {
        let config = WriterConfig {
            table: "orders_copy".into(),
            mode: WriteMode::Upsert,
            key_columns: vec![],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_config_min_over_max() {
        let config = DatabaseConfig {
            min_connections: 5,
            max_connections: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_source_config_from_env() {
        std::env::set_var("SLICER_SOURCE_TABLE", "events");
        std::env::set_var("SLICER_SOURCE_LOWER_BOUND", "100");
        std::env::set_var("SLICER_SOURCE_ROWS_PER_PARTITION", "250");

        let config = SourceConfig::from_env().unwrap();

        std::env::remove_var("SLICER_SOURCE_TABLE");
        std::env::remove_var("SLICER_SOURCE_LOWER_BOUND");
        std::env::remove_var("SLICER_SOURCE_ROWS_PER_PARTITION");

        assert_eq!(config.table, "events");
        assert_eq!(config.lower_bound, Some(100));
        assert_eq!(config.upper_bound, None);
        assert_eq!(config.rows_per_partition, 250);
    }

    #[test]
    #[serial]
    fn test_source_config_from_env_bad_number() {
        std::env::set_var("SLICER_SOURCE_BATCH_SIZE", "many");
        let result = SourceConfig::from_env();
        std::env::remove_var("SLICER_SOURCE_BATCH_SIZE");
        assert!(matches!(result, Err(ConnectorError::Common(_))));
    }

    #[test]
    #[serial]
    fn test_writer_config_key_columns_from_env() {
        std::env::set_var("SLICER_WRITER_KEY_COLUMNS", "tenant_id, id,");
        let config = WriterConfig::from_env().unwrap();
        std::env::remove_var("SLICER_WRITER_KEY_COLUMNS");
        assert_eq!(config.key_columns, vec!["tenant_id".to_string(), "id".to_string()]);
    }
}
