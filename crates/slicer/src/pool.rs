//! Connection pool and transaction abstraction
//!
//! The partition source and the writers talk to the database only through
//! [`ConnectionPool`] and [`Transaction`]. [`PgConnectionPool`] is the sqlx
//! PostgreSQL implementation.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row as _, TypeInfo};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::{ConnectorError, Result};
use crate::query::Statement;
use crate::types::{Row, Value};

/// A pool of database connections
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Run a statement that returns rows
    async fn query(&self, statement: &Statement) -> Result<Vec<Row>>;

    /// Run a statement outside a transaction, returning affected rows
    async fn execute(&self, statement: &Statement) -> Result<u64>;

    /// Acquire a connection and open a transaction on it
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Close every connection; later calls fail
    async fn close(&self);
}

/// An open transaction; dropping it without committing rolls it back
#[async_trait]
pub trait Transaction: Send {
    async fn execute(&mut self, statement: &Statement) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// PostgreSQL pool backed by `sqlx::PgPool`
#[derive(Debug, Clone)]
pub struct PgConnectionPool {
    pool: PgPool,
}

impl PgConnectionPool {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the database settings
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        config.validate()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Database pool connected"
        );

        Ok(Self { pool })
    }

    /// Build the pool without connecting; the first query opens a connection
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self> {
        config.validate()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .connect_lazy(&config.url)?;

        Ok(Self { pool })
    }

    pub fn inner(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ConnectionPool for PgConnectionPool {
    async fn query(&self, statement: &Statement) -> Result<Vec<Row>> {
        debug!(sql = %statement.sql, params = statement.params.len(), "Running query");
        let rows = bind(statement).fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&self, statement: &Statement) -> Result<u64> {
        let result = bind(statement).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed");
    }
}

struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<u64> {
        let result = bind(statement).execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn bind(statement: &Statement) -> Query<'_, Postgres, PgArguments> {
    let mut query = sqlx::query(&statement.sql);
    for value in &statement.params {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.as_str()),
            Value::Json(v) => query.bind(sqlx::types::Json(v.clone())),
            Value::Timestamp(v) => query.bind(*v),
            Value::Uuid(v) => query.bind(*v),
        };
    }
    query
}

fn decode_row(row: &PgRow) -> Result<Row> {
    let mut decoded = Row::new();

    for column in row.columns() {
        let i = column.ordinal();
        let value = match column.type_info().name() {
            "INT2" => row.try_get::<Option<i16>, _>(i)?.map(|v| Value::Int(v.into())),
            "INT4" => row.try_get::<Option<i32>, _>(i)?.map(|v| Value::Int(v.into())),
            "INT8" => row.try_get::<Option<i64>, _>(i)?.map(Value::Int),
            "FLOAT4" => row.try_get::<Option<f32>, _>(i)?.map(|v| Value::Float(v.into())),
            "FLOAT8" => row.try_get::<Option<f64>, _>(i)?.map(Value::Float),
            "BOOL" => row.try_get::<Option<bool>, _>(i)?.map(Value::Bool),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
                row.try_get::<Option<String>, _>(i)?.map(Value::Text)
            }
            "JSON" | "JSONB" => row.try_get::<Option<serde_json::Value>, _>(i)?.map(Value::Json),
            "TIMESTAMPTZ" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)?
                .map(Value::Timestamp),
            "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(i)?
                .map(|v| Value::Timestamp(v.and_utc())),
            "UUID" => row.try_get::<Option<uuid::Uuid>, _>(i)?.map(Value::Uuid),
            other => {
                return Err(ConnectorError::InvalidInput(format!(
                    "column '{}' has unsupported type {}",
                    column.name(),
                    other
                )))
            }
        };
        decoded.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }

    Ok(decoded)
}
