//! Reads the rows a partition covers

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::pool::ConnectionPool;
use crate::query::QueryBuilder;
use crate::types::{Partition, Row};

#[derive(Clone)]
pub struct PartitionReader {
    pool: Arc<dyn ConnectionPool>,
    builder: Arc<dyn QueryBuilder>,
}

impl PartitionReader {
    pub fn new(pool: Arc<dyn ConnectionPool>, builder: Arc<dyn QueryBuilder>) -> Self {
        Self { pool, builder }
    }

    /// Every row with `low <= id <= high`, ordered by id
    pub async fn read_rows(&self, partition: &Partition) -> Result<Vec<Row>> {
        let statement = self.builder.select_range(partition)?;
        let rows = self.pool.query(&statement).await?;
        debug!(partition = %partition, rows = rows.len(), "Read partition rows");
        Ok(rows)
    }
}
