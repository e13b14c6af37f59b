//! HTTP handlers
//!
//! - logs_api: function log queries, deletion and health
//! - metrics_handler: Prometheus scrape endpoint

pub mod logs_api;
pub mod metrics_handler;

pub use logs_api::LogsApiState;
