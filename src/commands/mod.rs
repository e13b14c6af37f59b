//! Command implementations for the CLI
//!
//! - start: Run the log server
//! - logs: Query stored function logs
//! - trim: Run one retention pass
//! - config: Configuration display and validation

pub mod config;
pub mod logs;
pub mod start;
pub mod trim;
