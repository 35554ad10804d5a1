//! Transactional table writers
//!
//! Each [`WriteMessage`] is applied inside one transaction: every row lands,
//! or none does. A failing statement rolls the transaction back and the
//! failure is returned as [`ConnectorError::Transaction`]. Nothing is retried
//! here; retry policy belongs to the host.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{WriteMode, WriterConfig};
use crate::error::{ConnectorError, Result};
use crate::pipeline::Pipeline;
use crate::pool::{ConnectionPool, Transaction};
use crate::query::{validate_identifier, QueryBuilder};
use crate::types::{Row, WriteMessage};

async fn begin(pool: &dyn ConnectionPool, table: &str) -> Result<Box<dyn Transaction>> {
    pool.begin().await.map_err(|e| ConnectorError::Transaction {
        table: table.to_string(),
        reason: format!("begin failed: {}", e),
    })
}

/// Commit on success, roll back and wrap the error on failure
async fn finish(tx: Box<dyn Transaction>, table: &str, outcome: Result<u64>) -> Result<u64> {
    match outcome {
        Ok(affected) => {
            tx.commit().await.map_err(|e| ConnectorError::Transaction {
                table: table.to_string(),
                reason: format!("commit failed: {}", e),
            })?;
            Ok(affected)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(table, error = %rollback, "Rollback failed");
            }
            Err(ConnectorError::Transaction {
                table: table.to_string(),
                reason: e.to_string(),
            })
        }
    }
}

/// Inserts every row of a message in one transaction
#[derive(Clone)]
pub struct TransactionalWriter {
    table: String,
    pool: Arc<dyn ConnectionPool>,
    builder: Arc<dyn QueryBuilder>,
}

impl TransactionalWriter {
    pub fn new(
        table: impl Into<String>,
        pool: Arc<dyn ConnectionPool>,
        builder: Arc<dyn QueryBuilder>,
    ) -> Self {
        Self {
            table: table.into(),
            pool,
            builder,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Insert the message's rows; returns the number inserted
    pub async fn write(&self, message: &WriteMessage) -> Result<u64> {
        if message.rows.is_empty() {
            return Ok(0);
        }

        let mut tx = begin(self.pool.as_ref(), &self.table).await?;
        let outcome = self.insert_all(tx.as_mut(), &message.rows).await;
        let inserted = finish(tx, &self.table, outcome).await?;

        debug!(table = %self.table, rows = inserted, "Message written");
        Ok(inserted)
    }

    async fn insert_all(&self, tx: &mut dyn Transaction, rows: &[Row]) -> Result<u64> {
        let mut inserted = 0;
        for row in rows {
            let statement = self.builder.insert(&self.table, row)?;
            inserted += tx.execute(&statement).await?;
        }
        Ok(inserted)
    }
}

#[async_trait]
impl Pipeline for TransactionalWriter {
    async fn write_batch(&self, message: &WriteMessage) -> Result<bool> {
        self.write(message).await.map(|_| true)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Updates rows matching a predicate, inserting when nothing matches
///
/// The predicate for a row is the message's predicate when it carries one,
/// otherwise the row's values for the configured key columns. A row with
/// neither is rejected.
#[derive(Clone)]
pub struct TransactionalUpserter {
    table: String,
    key_columns: Vec<String>,
    pool: Arc<dyn ConnectionPool>,
    builder: Arc<dyn QueryBuilder>,
}

/// Rows touched by an upsert, split by how they were applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub updated: u64,
    pub inserted: u64,
}

impl TransactionalUpserter {
    pub fn new(
        table: impl Into<String>,
        pool: Arc<dyn ConnectionPool>,
        builder: Arc<dyn QueryBuilder>,
    ) -> Self {
        Self {
            table: table.into(),
            key_columns: Vec::new(),
            pool,
            builder,
        }
    }

    /// Derive each row's predicate from these columns when a message has none
    pub fn with_key_columns(mut self, key_columns: Vec<String>) -> Result<Self> {
        for column in &key_columns {
            validate_identifier(column)?;
        }
        self.key_columns = key_columns;
        Ok(self)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn upsert(&self, message: &WriteMessage) -> Result<UpsertSummary> {
        if message.rows.is_empty() {
            return Ok(UpsertSummary::default());
        }
        if message.predicate.is_none() && self.key_columns.is_empty() {
            return Err(ConnectorError::InvalidInput(format!(
                "upsert into {} needs a predicate or key columns",
                self.table
            )));
        }

        let mut tx = begin(self.pool.as_ref(), &self.table).await?;
        let mut summary = UpsertSummary::default();
        let outcome = self.upsert_all(tx.as_mut(), message, &mut summary).await;
        finish(tx, &self.table, outcome).await?;

        debug!(
            table = %self.table,
            updated = summary.updated,
            inserted = summary.inserted,
            "Message upserted"
        );
        Ok(summary)
    }

    async fn upsert_all(
        &self,
        tx: &mut dyn Transaction,
        message: &WriteMessage,
        summary: &mut UpsertSummary,
    ) -> Result<u64> {
        for row in &message.rows {
            let predicate = match &message.predicate {
                Some(predicate) => predicate.clone(),
                None => self.key_predicate(row)?,
            };

            let update = self.builder.update(&self.table, row, &predicate)?;
            let updated = tx.execute(&update).await?;
            if updated > 0 {
                summary.updated += updated;
                continue;
            }

            // Row values win over predicate values for shared columns
            let mut merged = predicate;
            merged.extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));
            let insert = self.builder.insert(&self.table, &merged)?;
            summary.inserted += tx.execute(&insert).await?;
        }
        Ok(summary.updated + summary.inserted)
    }

    fn key_predicate(&self, row: &Row) -> Result<Row> {
        self.key_columns
            .iter()
            .map(|column| {
                row.get(column)
                    .map(|value| (column.clone(), value.clone()))
                    .ok_or_else(|| {
                        ConnectorError::InvalidInput(format!(
                            "row for {} is missing key column '{}'",
                            self.table, column
                        ))
                    })
            })
            .collect()
    }
}

#[async_trait]
impl Pipeline for TransactionalUpserter {
    async fn write_batch(&self, message: &WriteMessage) -> Result<bool> {
        self.upsert(message).await.map(|_| true)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Build the writer the configuration asks for
pub fn from_config(
    config: &WriterConfig,
    pool: Arc<dyn ConnectionPool>,
    builder: Arc<dyn QueryBuilder>,
) -> Result<Box<dyn Pipeline>> {
    config.validate()?;
    match config.mode {
        WriteMode::Insert => Ok(Box::new(TransactionalWriter::new(&config.table, pool, builder))),
        WriteMode::Upsert => Ok(Box::new(
            TransactionalUpserter::new(&config.table, pool, builder)
                .with_key_columns(config.key_columns.clone())?,
        )),
    }
}
