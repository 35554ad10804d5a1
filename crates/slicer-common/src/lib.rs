//! Slicer Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, environment parsing and logging for the Slicer
//! workspace members.
//!
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias
//! - **Environment**: typed `SLICER_*` variable lookup with defaults
//! - **Logging**: `tracing` subscriber setup for console and rolling files
//!
//! # Example
//!
//! ```no_run
//! use slicer_common::env;
//! use slicer_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     let batch_size: usize = env::parse_or("SLICER_BATCH_SIZE", 100)?;
//!     tracing::info!(batch_size, "Configured");
//!     Ok(())
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
