//! Logs query command
//!
//! Query and display function logs straight from the SQLite database.

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use fnhost_logs::config::Config;
use fnhost_logs::handlers::logs_api::parse_levels;
use fnhost_logs::logs::{LogDb, LogEntry, LogLevel, LogQuery};

/// Query and display logs
#[derive(Debug, Clone, Parser)]
pub struct LogsArgs {
    /// Only logs of this function
    #[arg(long)]
    pub function: Option<String>,

    /// Every entry of one request, oldest first (ignores the other filters)
    #[arg(short, long)]
    pub request_id: Option<String>,

    /// Comma-separated levels (log, info, warn, error, stdout, exec_end, ...)
    #[arg(short, long)]
    pub level: Option<String>,

    /// Page size
    #[arg(short = 'n', long, default_value = "100")]
    pub limit: i64,

    /// Continue from a cursor printed by a previous page
    #[arg(long)]
    pub cursor: Option<String>,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    pub format: String,
}

/// Execute the logs command
pub async fn execute(cfg: &Config, args: LogsArgs) -> Result<()> {
    let db = LogDb::new(&cfg.database.url).await?;

    if let Some(request_id) = &args.request_id {
        let logs = db.get_by_request_id(request_id).await?;
        print_logs(&logs, &args.format)?;
        db.close().await;
        return Ok(());
    }

    let levels = parse_levels(args.level.as_deref()).map_err(|e| anyhow::anyhow!("{}", e))?;
    let page = db
        .get_paginated(LogQuery {
            function_id: args.function.clone(),
            levels,
            limit: args.limit,
            cursor: args.cursor.clone(),
        })
        .await?;

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&page)?);
    } else {
        print_logs(&page.logs, &args.format)?;
        if let Some(next) = &page.next_cursor {
            println!();
            println!("{} --cursor {}", "More entries available:".bold(), next);
        }
    }

    db.close().await;
    Ok(())
}

fn print_logs(logs: &[LogEntry], format: &str) -> Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(logs)?);
        return Ok(());
    }

    if logs.is_empty() {
        println!("{}", "No logs found matching the criteria".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} log entries", logs.len()).bold());
    println!();
    for log in logs {
        println!("{}", format_entry(log));
    }
    Ok(())
}

/// One human-readable line per entry
fn format_entry(log: &LogEntry) -> String {
    let timestamp = log.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string();

    let level = log.level.as_str();
    let level_colored = match log.level {
        LogLevel::Error | LogLevel::Stderr | LogLevel::ExecReject => level.red().bold(),
        LogLevel::Warn => level.yellow().bold(),
        LogLevel::Info | LogLevel::ExecEnd => level.green(),
        LogLevel::Debug | LogLevel::ExecStart => level.blue(),
        _ => level.normal(),
    };

    let function = log.function_id.as_deref().unwrap_or("(orphaned)");
    let request = &log.request_id[..8.min(log.request_id.len())];

    let mut line = format!(
        "{} {} {} {} {}",
        timestamp.dimmed(),
        level_colored,
        function.cyan(),
        format!("req={}", request).dimmed(),
        log.message
    );
    if let Some(args) = &log.args {
        line.push(' ');
        line.push_str(&args.dimmed().to_string());
    }
    line
}
