use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use crate::registry::InMemoryFunctionRegistry;
use crate::settings::SharedSettings;

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Graceful shutdown (stop trimming, drain the log buffer, close the pool)
    Graceful,
}

/// Runtime state a SIGHUP reload is allowed to touch
///
/// Batching sizes, retention and listen address need a restart; global
/// settings and the function registry are swapped in place.
#[derive(Clone)]
pub struct ReloadTargets {
    pub config_path: PathBuf,
    pub settings: Arc<SharedSettings>,
    pub registry: Option<Arc<InMemoryFunctionRegistry>>,
}

/// Setup signal handlers for the server
///
/// Returns a broadcast sender for shutdown signals and a join handle for the signal task
///
/// Handles:
/// - SIGTERM/SIGINT: Graceful shutdown
/// - SIGHUP: Reload global settings and the function registry
#[cfg(unix)]
pub fn setup_signal_handlers(
    targets: ReloadTargets,
) -> (
    broadcast::Sender<ShutdownSignal>,
    tokio::task::JoinHandle<()>,
) {
    let (shutdown_tx, _) = broadcast::channel(16);
    let tx_clone = shutdown_tx.clone();

    let handle = tokio::spawn(async move {
        let (mut sigterm, mut sigint, mut sighup) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
            signal(SignalKind::hangup()),
        ) {
            (Ok(term), Ok(int), Ok(hup)) => (term, int, hup),
            _ => {
                warn!("Failed to install unix signal handlers, falling back to Ctrl+C");
                wait_for_ctrl_c(tx_clone).await;
                return;
            }
        };

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("SIGTERM received, initiating graceful shutdown");
                    let _ = tx_clone.send(ShutdownSignal::Graceful);
                    break;
                }
                _ = sigint.recv() => {
                    info!("SIGINT received, initiating graceful shutdown");
                    let _ = tx_clone.send(ShutdownSignal::Graceful);
                    break;
                }
                _ = sighup.recv() => {
                    info!("SIGHUP received, reloading settings");
                    if let Err(e) = reload_config(&targets) {
                        error!("Failed to reload configuration: {}", e);
                    } else {
                        info!("Settings reloaded successfully");
                    }
                }
            }
        }
    });

    (shutdown_tx, handle)
}

/// Windows placeholder - signals not fully supported
#[cfg(not(unix))]
pub fn setup_signal_handlers(
    _targets: ReloadTargets,
) -> (
    broadcast::Sender<ShutdownSignal>,
    tokio::task::JoinHandle<()>,
) {
    let (shutdown_tx, _) = broadcast::channel(16);
    let tx_clone = shutdown_tx.clone();

    let handle = tokio::spawn(wait_for_ctrl_c(tx_clone));

    (shutdown_tx, handle)
}

async fn wait_for_ctrl_c(tx: broadcast::Sender<ShutdownSignal>) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Ctrl+C received, initiating shutdown");
            let _ = tx.send(ShutdownSignal::Graceful);
        }
        Err(e) => {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    }
}

/// Reload `[settings]` and `[registry]` from the configuration file
///
/// The new file is fully loaded and validated before anything is swapped, so a
/// broken file leaves the running state untouched.
pub fn reload_config(targets: &ReloadTargets) -> Result<()> {
    let new_config = crate::config::load_config_from(&targets.config_path)?;

    let settings = new_config.global_settings();
    info!(
        settings = settings.len(),
        functions = new_config.registry.functions.len(),
        "New configuration loaded"
    );
    targets.settings.replace_all(settings);

    match &targets.registry {
        Some(registry) => registry.replace_all(new_config.registry.functions),
        None if !new_config.registry.functions.is_empty() => {
            warn!("Registry was disabled at startup; restart to enable function checks");
        }
        None => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::FunctionRegistry;
    use crate::settings::SettingsProvider;
    use std::collections::HashMap;
    use std::io::Write;

    fn targets(path: PathBuf) -> ReloadTargets {
        ReloadTargets {
            config_path: path,
            settings: Arc::new(SharedSettings::new(HashMap::new())),
            registry: Some(Arc::new(InMemoryFunctionRegistry::new(["old-fn"]))),
        }
    }

    #[tokio::test]
    async fn test_setup_signal_handlers() {
        let (shutdown_tx, handle) =
            setup_signal_handlers(targets(PathBuf::from("missing-config.toml")));

        // Should be able to subscribe to shutdown signals
        let mut rx = shutdown_tx.subscribe();
        shutdown_tx.send(ShutdownSignal::Graceful).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received, ShutdownSignal::Graceful);
        handle.abort();
    }

    #[test]
    fn test_reload_swaps_settings_and_registry() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[registry]
functions = ["new-fn"]

[settings]
LOG_BATCHING_MAX_BATCH_SIZE = "7"
"#
        )
        .unwrap();

        let targets = targets(file.path().to_path_buf());
        reload_config(&targets).unwrap();

        assert_eq!(
            targets.settings.get_global_setting("LOG_BATCHING_MAX_BATCH_SIZE").as_deref(),
            Some("7")
        );
        let registry = targets.registry.as_ref().unwrap();
        assert!(registry.contains("new-fn"));
        assert!(!registry.contains("old-fn"));
    }

    #[test]
    fn test_invalid_reload_keeps_running_state() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[batching]\nmax_batch_size = 0\n[registry]\nfunctions = [\"x\"]").unwrap();

        let targets = targets(file.path().to_path_buf());
        assert!(reload_config(&targets).is_err());
        assert!(targets.registry.as_ref().unwrap().contains("old-fn"));
    }
}
