use anyhow::Result;
use colored::Colorize;
use fnhost_logs::{config::Config, server};
use std::path::PathBuf;
use tracing::info;

/// Execute the start command
///
/// Runs the log server in the foreground until SIGINT/SIGTERM.
pub async fn execute(cfg: Config, config_path: PathBuf) -> Result<()> {
    println!("{}", "Starting function log server...".green());
    info!(config = %config_path.display(), "Starting function log server");

    server::start_server(cfg, config_path).await
}
