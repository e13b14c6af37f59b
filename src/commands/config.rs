use anyhow::Result;
use colored::Colorize;
use fnhost_logs::config::Config;
use tracing::info;

/// Execute the config show command
///
/// Displays the effective configuration (file plus environment overrides)
pub fn show(cfg: &Config) -> Result<()> {
    info!("Displaying configuration");

    println!("{}", "Current Configuration:".green().bold());
    println!();

    let toml_string = toml::to_string_pretty(cfg)?;
    println!("{}", toml_string);

    Ok(())
}

/// Execute the config validate command
///
/// Loading already validated the configuration; this prints a summary
pub fn validate(cfg: &Config) -> Result<()> {
    println!("{}", "✓ Configuration is valid".green());
    println!();
    println!("{}", "Summary:".bold());
    println!("  Database: {}", cfg.database.url);
    println!(
        "  Batching: {} entries / {}ms",
        cfg.batching.max_batch_size, cfg.batching.max_delay_ms
    );
    println!(
        "  Retention: {} per function, {}",
        cfg.trimming.max_logs_per_function,
        describe_retention(cfg.trimming.retention_seconds)
    );
    println!("  Registered Functions: {}", describe_registry(cfg));
    println!("  Global Settings: {}", cfg.settings.len());

    info!("Configuration validation successful");
    Ok(())
}

fn describe_retention(seconds: u64) -> String {
    match seconds {
        0 => "no age limit".to_string(),
        s if s % 86_400 == 0 => format!("{} day(s)", s / 86_400),
        s if s % 3_600 == 0 => format!("{} hour(s)", s / 3_600),
        s => format!("{} second(s)", s),
    }
}

fn describe_registry(cfg: &Config) -> String {
    if cfg.registry.functions.is_empty() {
        "checks disabled".to_string()
    } else {
        cfg.registry.functions.len().to_string()
    }
}
