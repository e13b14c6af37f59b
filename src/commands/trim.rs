//! One-shot retention pass

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use fnhost_logs::config::Config;
use fnhost_logs::logs::{LogDb, LogTrimmer, LogTrimmingConfig};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Parser)]
pub struct TrimArgs {
    /// Override `trimming.max_logs_per_function`
    #[arg(long)]
    pub max_logs: Option<u64>,

    /// Override `trimming.retention_seconds` (0 disables age-based deletion)
    #[arg(long)]
    pub retention_seconds: Option<u64>,
}

impl TrimArgs {
    fn apply(&self, mut config: LogTrimmingConfig) -> Result<LogTrimmingConfig> {
        if let Some(max_logs) = self.max_logs {
            if max_logs == 0 {
                anyhow::bail!("--max-logs must be at least 1");
            }
            config.max_logs_per_function = max_logs;
        }
        if let Some(retention) = self.retention_seconds {
            config.retention_seconds = retention;
        }
        Ok(config)
    }
}

/// Execute the trim command
pub async fn execute(cfg: &Config, args: TrimArgs) -> Result<()> {
    let trimming = args.apply(cfg.trimming)?;
    let db = Arc::new(LogDb::new(&cfg.database.url).await?);
    let before = db.count().await?;

    println!("{}", "Running retention pass...".yellow());
    info!(
        max_logs_per_function = trimming.max_logs_per_function,
        retention_seconds = trimming.retention_seconds,
        "Manual retention pass"
    );

    let trimmer = LogTrimmer::new(db.clone(), trimming);
    let stats = trimmer.run_once().await?;

    match stats {
        Some(stats) => {
            println!("{}", "✓ Retention pass complete".green());
            println!();
            println!("{}", "Summary:".bold());
            println!("  Entries before:     {}", before);
            println!("  Expired deleted:    {}", stats.expired_deleted);
            println!("  Over-limit deleted: {}", stats.trimmed_deleted);
            println!("  Functions checked:  {}", stats.functions_checked);
            println!("  Entries after:      {}", db.count().await?);
        }
        None => println!("{}", "Another retention pass is already running".yellow()),
    }

    db.close().await;
    Ok(())
}
