use crate::logs::{LogServiceOptions, LogTrimmingConfig};
use crate::settings::{
    DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_DELAY_MS, DEFAULT_SETTINGS_REFRESH_INTERVAL_MS,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "FNHOST_LOGS";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub batching: BatchingConfig,
    pub trimming: LogTrimmingConfig,
    pub registry: RegistryConfig,
    /// Initial global settings (e.g. `LOG_BATCHING_MAX_BATCH_SIZE`)
    pub settings: HashMap<String, String>,
    pub metrics: MetricsConfig,
}

impl Config {
    /// Global settings keyed by upper-case name
    ///
    /// Sources may lower-case keys, so names are normalized here.
    pub fn global_settings(&self) -> HashMap<String, String> {
        self.settings
            .iter()
            .map(|(name, value)| (name.to_ascii_uppercase(), value.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// `pretty` or `json`
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:./data/function_logs.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub max_batch_size: usize,
    pub max_delay_ms: u64,
    pub settings_refresh_interval_ms: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            settings_refresh_interval_ms: DEFAULT_SETTINGS_REFRESH_INTERVAL_MS,
        }
    }
}

impl BatchingConfig {
    /// Service options without collaborators; callers attach settings/registry
    pub fn service_options(&self) -> LogServiceOptions {
        LogServiceOptions {
            max_batch_size: self.max_batch_size,
            max_delay: Duration::from_millis(self.max_delay_ms),
            settings_refresh_interval: Duration::from_millis(self.settings_refresh_interval_ms),
            ..LogServiceOptions::default()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Known function ids. Empty disables registry checks (no orphaning, no 404s).
    pub functions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "/metrics".to_string(),
        }
    }
}

/// Load `config.toml` from the working directory plus environment overrides
pub fn load_config() -> anyhow::Result<Config> {
    load_config_from(Path::new("config.toml"))
}

/// Load configuration from `path` (optional) layered under `FNHOST_LOGS__*` variables
pub fn load_config_from(path: &Path) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.database.url.trim().is_empty() {
        anyhow::bail!("database.url cannot be empty");
    }

    if cfg.batching.max_batch_size == 0 {
        anyhow::bail!("batching.max_batch_size must be at least 1");
    }
    if cfg.batching.max_delay_ms == 0 {
        anyhow::bail!("batching.max_delay_ms must be at least 1");
    }
    if cfg.batching.settings_refresh_interval_ms == 0 {
        anyhow::bail!("batching.settings_refresh_interval_ms must be at least 1");
    }

    if cfg.trimming.trimming_interval_seconds == 0 {
        anyhow::bail!("trimming.trimming_interval_seconds must be at least 1");
    }
    if cfg.trimming.max_logs_per_function == 0 {
        anyhow::bail!("trimming.max_logs_per_function must be at least 1");
    }

    if !matches!(cfg.server.log_format.as_str(), "pretty" | "json") {
        anyhow::bail!(
            "server.log_format must be 'pretty' or 'json', got '{}'",
            cfg.server.log_format
        );
    }

    if cfg.metrics.enabled && !cfg.metrics.endpoint.starts_with('/') {
        anyhow::bail!("metrics.endpoint must start with '/'");
    }

    if cfg.registry.functions.iter().any(|f| f.trim().is_empty()) {
        anyhow::bail!("registry.functions cannot contain empty ids");
    }

    Ok(())
}
