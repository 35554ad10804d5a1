//! Error types shared across Slicer crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by the shared helpers
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Invalid value for {name}: '{value}' ({reason})")]
    InvalidEnv {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Invalid log setting: {0}")]
    InvalidLogSetting(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
