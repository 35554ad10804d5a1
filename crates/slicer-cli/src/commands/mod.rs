//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod checkpoint;
pub mod copy;
pub mod plan;
