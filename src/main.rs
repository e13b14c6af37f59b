use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use fnhost_logs::{config, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let command = args.get_command();

    if let cli::Commands::Version = command {
        println!("fnhost-logs v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Tracing level/format come from the config, so load it first
    let cfg = config::load_config_from(&args.config);
    match &cfg {
        Ok(cfg) => init_tracing(&cfg.server.log_level, &cfg.server.log_format),
        Err(_) => init_tracing("info", "pretty"),
    }
    let cfg = cfg?;

    match command {
        cli::Commands::Start => {
            commands::start::execute(cfg, args.config.clone()).await?;
        }
        cli::Commands::Logs(logs_args) => {
            commands::logs::execute(&cfg, logs_args).await?;
        }
        cli::Commands::Trim(trim_args) => {
            commands::trim::execute(&cfg, trim_args).await?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(&cfg)?,
            cli::ConfigCommands::Validate => commands::config::validate(&cfg)?,
        },
        cli::Commands::Version => {}
    }

    Ok(())
}
