//! Connector error types

use thiserror::Error;

/// Result type alias for connector operations
pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Errors surfaced by the partition source and the table writers
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// Startup could not complete: bounds query or checkpoint bootstrap failed
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// Pushing the initial partitions or the terminal signal onto the work queue failed
    #[error("Seeding the work queue failed: {0}")]
    Seeding(String),

    /// A message's transaction was rolled back
    #[error("Transaction rolled back for {table}: {reason}")]
    Transaction { table: String, reason: String },

    #[error("Acknowledgement for {0} timed out waiting for the commit loop")]
    AckTimeout(String),

    /// The work queue stayed full for the whole retry wait
    #[error("Work queue full, could not re-enqueue {0}")]
    QueueFull(String),

    #[error("Checkpoint log error: {0}")]
    Checkpoint(String),

    #[error("Pipeline closed: {0}")]
    Closed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] slicer_common::CommonError),
}

impl ConnectorError {
    pub fn init(message: impl Into<String>) -> Self {
        ConnectorError::Initialization(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        ConnectorError::Config(message.into())
    }

    /// Wrap `self` as an initialization failure, keeping its message
    pub fn during_init(self, step: &str) -> Self {
        match self {
            ConnectorError::Initialization(_) => self,
            other => ConnectorError::Initialization(format!("{}: {}", step, other)),
        }
    }
}
