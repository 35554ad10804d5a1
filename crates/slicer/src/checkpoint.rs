//! Durable key-value store for partition completion state
//!
//! Keys are task identities; values are [`CompletionMap`]s. The partition
//! source writes the initial map with [`CheckpointLog::write_if_absent`] and
//! reads back whatever is stored, so a restarted task resumes from its last
//! checkpoint instead of starting over.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ConnectorError, Result};
use crate::types::CompletionMap;

#[async_trait]
pub trait CheckpointLog: Send + Sync {
    /// Store `value` under `key` unless a value already exists; true if written
    async fn write_if_absent(&self, key: &str, value: &CompletionMap) -> Result<bool>;

    async fn read(&self, key: &str) -> Result<Option<CompletionMap>>;

    /// Store `value` under `key`, replacing any existing value
    async fn force_write(&self, key: &str, value: &CompletionMap) -> Result<()>;
}

/// Process-local checkpoint log
///
/// State lives as long as the value, so it survives a pipeline restart within
/// one process but not a process restart.
#[derive(Debug, Default)]
pub struct MemoryCheckpointLog {
    entries: Mutex<HashMap<String, CompletionMap>>,
}

impl MemoryCheckpointLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointLog for MemoryCheckpointLog {
    async fn write_if_absent(&self, key: &str, value: &CompletionMap) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.clone());
        Ok(true)
    }

    async fn read(&self, key: &str) -> Result<Option<CompletionMap>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn force_write(&self, key: &str, value: &CompletionMap) -> Result<()> {
        self.entries.lock().await.insert(key.to_string(), value.clone());
        Ok(())
    }
}

/// Checkpoint log stored in a PostgreSQL table
///
/// ```sql
/// CREATE TABLE slicer_checkpoints (
///     task_id    TEXT PRIMARY KEY,
///     completion JSONB NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// )
/// ```
#[derive(Debug, Clone)]
pub struct PgCheckpointLog {
    pool: PgPool,
}

impl PgCheckpointLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the checkpoint table if it does not exist
    pub async fn ensure_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS slicer_checkpoints (
                task_id TEXT PRIMARY KEY,
                completion JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ConnectorError::Checkpoint(format!("failed to create checkpoint table: {}", e)))?;

        info!("Checkpoint table ready");
        Ok(())
    }
}

#[async_trait]
impl CheckpointLog for PgCheckpointLog {
    async fn write_if_absent(&self, key: &str, value: &CompletionMap) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO slicer_checkpoints (task_id, completion)
            VALUES ($1, $2)
            ON CONFLICT (task_id) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(sqlx::types::Json(value))
        .execute(&self.pool)
        .await
        .map_err(|e| ConnectorError::Checkpoint(format!("failed to initialize checkpoint: {}", e)))?;

        Ok(result.rows_affected() == 1)
    }

    async fn read(&self, key: &str) -> Result<Option<CompletionMap>> {
        let stored: Option<sqlx::types::Json<CompletionMap>> =
            sqlx::query_scalar("SELECT completion FROM slicer_checkpoints WHERE task_id = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| ConnectorError::Checkpoint(format!("failed to read checkpoint: {}", e)))?;

        Ok(stored.map(|json| json.0))
    }

    async fn force_write(&self, key: &str, value: &CompletionMap) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO slicer_checkpoints (task_id, completion, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (task_id)
            DO UPDATE SET completion = EXCLUDED.completion, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(sqlx::types::Json(value))
        .execute(&self.pool)
        .await
        .map_err(|e| ConnectorError::Checkpoint(format!("failed to write checkpoint: {}", e)))?;

        debug!(task_id = key, remaining = value.len(), "Checkpoint written");
        Ok(())
    }
}
