//! Global settings consumed by the log buffer
//!
//! Batching parameters are read from a [`SettingsProvider`] into an atomic
//! snapshot ([`BatchTunables`]) on a fixed interval. The hot path only ever
//! loads atomics and never calls the provider.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const MAX_BATCH_SIZE_KEY: &str = "LOG_BATCHING_MAX_BATCH_SIZE";
pub const MAX_DELAY_MS_KEY: &str = "LOG_BATCHING_MAX_DELAY_MS";

pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;
pub const DEFAULT_MAX_DELAY_MS: u64 = 50;
pub const DEFAULT_SETTINGS_REFRESH_INTERVAL_MS: u64 = 5_000;

/// Source of platform-wide settings
pub trait SettingsProvider: Send + Sync {
    fn get_global_setting(&self, name: &str) -> Option<String>;
}

impl SettingsProvider for HashMap<String, String> {
    fn get_global_setting(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Settings map that can be updated at runtime (admin surface, config reload)
#[derive(Default)]
pub struct SharedSettings {
    values: ArcSwap<HashMap<String, String>>,
}

impl SharedSettings {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self {
            values: ArcSwap::from_pointee(values),
        }
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        self.values.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(name.clone(), value.clone());
            next
        });
    }

    pub fn remove(&self, name: &str) {
        self.values.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(name);
            next
        });
    }

    pub fn replace_all(&self, values: HashMap<String, String>) {
        self.values.store(Arc::new(values));
    }
}

impl SettingsProvider for SharedSettings {
    fn get_global_setting(&self, name: &str) -> Option<String> {
        self.values.load().get(name).cloned()
    }
}

/// Snapshot of the batching parameters
pub struct BatchTunables {
    max_batch_size: AtomicUsize,
    max_delay_ms: AtomicU64,
    refresh_interval: Duration,
    last_refresh: Mutex<Instant>,
}

impl BatchTunables {
    pub fn new(max_batch_size: usize, max_delay_ms: u64, refresh_interval: Duration) -> Self {
        Self {
            max_batch_size: AtomicUsize::new(max_batch_size.max(1)),
            max_delay_ms: AtomicU64::new(max_delay_ms.max(1)),
            refresh_interval,
            last_refresh: Mutex::new(Instant::now()),
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size.load(Ordering::Relaxed)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.load(Ordering::Relaxed))
    }

    /// Re-read both settings now
    ///
    /// Missing or unparsable values keep the current value.
    pub fn refresh(&self, provider: &dyn SettingsProvider) {
        if let Some(size) = provider
            .get_global_setting(MAX_BATCH_SIZE_KEY)
            .and_then(|raw| parse_positive(&raw))
        {
            let previous = self.max_batch_size.swap(size as usize, Ordering::Relaxed);
            if previous != size as usize {
                tracing::debug!(previous, current = size, "Log batch size updated");
            }
        }

        if let Some(delay) = provider
            .get_global_setting(MAX_DELAY_MS_KEY)
            .and_then(|raw| parse_positive(&raw))
        {
            let previous = self.max_delay_ms.swap(delay, Ordering::Relaxed);
            if previous != delay {
                tracing::debug!(previous, current = delay, "Log batch delay updated");
            }
        }

        if let Ok(mut last) = self.last_refresh.lock() {
            *last = Instant::now();
        }
    }

    /// Refresh only if the refresh interval has elapsed; returns whether it did
    pub fn refresh_if_due(&self, provider: &dyn SettingsProvider) -> bool {
        let due = self
            .last_refresh
            .lock()
            .map(|last| last.elapsed() >= self.refresh_interval)
            .unwrap_or(true);

        if due {
            self.refresh(provider);
        }
        due
    }
}

impl Default for BatchTunables {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_BATCH_SIZE,
            DEFAULT_MAX_DELAY_MS,
            Duration::from_millis(DEFAULT_SETTINGS_REFRESH_INTERVAL_MS),
        )
    }
}

/// Parse a setting as a positive integer, clamping values below 1 up to 1
fn parse_positive(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let value = match raw.parse::<i64>() {
        Ok(value) => value,
        Err(_) => {
            let float = raw.parse::<f64>().ok().filter(|f| f.is_finite())?;
            float.trunc() as i64
        }
    };
    Some(value.max(1) as u64)
}
