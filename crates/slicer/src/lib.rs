//! Slicer Connector Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Turns one large table into id-range partitions, delivers them at least once
//! through a bounded queue, and checkpoints completed ranges so a restarted
//! task does not read them again. Companion writers apply processed rows back
//! to a table, one transaction per message.
//!
//! # Architecture
//!
//! - **Partitioner**: contiguous inclusive id ranges covering `[min, max]`
//! - **Partition source**: work queue, pending-work tracker, ack and retry
//! - **Commit loop**: background task folding acks into the checkpoint log
//! - **Writers**: transactional insert and update-or-insert
//!
//! The database is reached only through [`ConnectionPool`] and
//! [`QueryBuilder`]; checkpoints only through [`CheckpointLog`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use slicer::{
//!     ConnectorConfig, MemoryCheckpointLog, PartitionReader, PartitionSource,
//!     PgConnectionPool, PostgresQueryBuilder, TaskContext, WorkItem,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConnectorConfig::load()?;
//!     let pool = Arc::new(PgConnectionPool::connect(&config.database).await?);
//!     let builder = Arc::new(PostgresQueryBuilder::new());
//!     let context = TaskContext::new(
//!         config.task_id.clone(),
//!         config.source.clone(),
//!         Arc::new(MemoryCheckpointLog::new()),
//!     );
//!
//!     let source = PartitionSource::start(context, pool.clone(), builder.clone()).await?;
//!     let reader = PartitionReader::new(pool, builder);
//!
//!     while !source.is_drained() {
//!         for message in source.read_batch(10).await? {
//!             match &message.item {
//!                 WorkItem::Partition(partition) => {
//!                     let rows = reader.read_rows(partition).await?;
//!                     tracing::info!(rows = rows.len(), "Processed {}", partition);
//!                     source.ack(&message.id).await?;
//!                 }
//!                 WorkItem::Done if source.is_drained() => {}
//!                 WorkItem::Done => {
//!                     source.retry(&message.id).await?;
//!                 }
//!             }
//!         }
//!     }
//!
//!     source.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod commit;
pub mod config;
pub mod error;
pub mod partitioner;
pub mod pipeline;
pub mod pool;
pub mod query;
pub mod reader;
pub mod source;
pub mod tracker;
pub mod types;
pub mod writer;

pub use checkpoint::{CheckpointLog, MemoryCheckpointLog, PgCheckpointLog};
pub use commit::CommitLoop;
pub use config::{ConnectorConfig, DatabaseConfig, SourceConfig, WriteMode, WriterConfig};
pub use error::{ConnectorError, Result};
pub use partitioner::{partition_ranges, plan_partitions, resolve_bounds, PartitionBounds};
pub use pipeline::Pipeline;
pub use pool::{ConnectionPool, PgConnectionPool, Transaction};
pub use query::{PostgresQueryBuilder, QueryBuilder, Statement};
pub use reader::PartitionReader;
pub use source::{PartitionSource, TaskContext};
pub use tracker::PendingWorkTracker;
pub use types::{
    CompletionMap, MessageId, Partition, PartitionStatus, PendingMessage, Row, Value, WorkItem,
    WriteMessage,
};
pub use writer::{TransactionalUpserter, TransactionalWriter, UpsertSummary};
