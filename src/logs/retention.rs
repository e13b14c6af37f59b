//! Background retention for function logs
//!
//! A self-scheduling task that enforces two policies on every pass:
//! - age: delete everything older than `retention_seconds` (0 disables)
//! - count: keep at most `max_logs_per_function` newest entries per function
//!
//! Passes never overlap. After `MAX_CONSECUTIVE_FAILURES` failed passes in a
//! row the timer stops itself instead of failing forever.

use super::database::LogDb;
use crate::error::LogResult;
use crate::metrics;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time;

pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;
pub const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Retention configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogTrimmingConfig {
    /// Seconds between retention passes
    pub trimming_interval_seconds: u64,

    /// Newest entries kept per function
    pub max_logs_per_function: u64,

    /// Maximum entry age in seconds; 0 disables age-based deletion
    pub retention_seconds: u64,
}

impl Default for LogTrimmingConfig {
    fn default() -> Self {
        Self {
            trimming_interval_seconds: 3600,
            max_logs_per_function: 10_000,
            retention_seconds: 7 * 24 * 60 * 60,
        }
    }
}

/// Outcome of one retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimStats {
    pub expired_deleted: u64,
    pub trimmed_deleted: u64,
    pub functions_checked: usize,
    /// The pass stopped early because `stop()` was called
    pub interrupted: bool,
}

#[derive(Default)]
struct TrimmerState {
    pass_running: AtomicBool,
    stop_requested: AtomicBool,
    consecutive_failures: AtomicU32,
    wake: Notify,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// Retention service handle
pub struct LogTrimmer {
    db: Arc<LogDb>,
    config: LogTrimmingConfig,
    interval: Duration,
    state: Arc<TrimmerState>,
}

impl LogTrimmer {
    pub fn new(db: Arc<LogDb>, config: LogTrimmingConfig) -> Self {
        Self {
            db,
            config,
            interval: Duration::from_secs(config.trimming_interval_seconds.max(1)),
            state: Arc::new(TrimmerState::default()),
        }
    }

    pub fn config(&self) -> &LogTrimmingConfig {
        &self.config
    }

    /// Run one pass now and keep running passes on the configured interval
    ///
    /// Returns `false` (and does nothing) if the service is already running.
    pub fn start(&self) -> bool {
        let mut timer = self.state.timer.lock().unwrap_or_else(|p| p.into_inner());
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::warn!("Log trimming service already running");
            return false;
        }

        self.state.stop_requested.store(false, Ordering::Release);
        self.state.consecutive_failures.store(0, Ordering::Release);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            max_logs_per_function = self.config.max_logs_per_function,
            retention_seconds = self.config.retention_seconds,
            "Starting log trimming service"
        );

        *timer = Some(tokio::spawn(trim_loop(
            self.db.clone(),
            self.config,
            self.interval,
            self.state.clone(),
        )));
        true
    }

    /// Stop the timer and wait (bounded) for an in-flight pass to finish
    pub async fn stop(&self) {
        self.state.stop_requested.store(true, Ordering::Release);
        self.state.wake.notify_one();

        let handle = self.state.timer.lock().unwrap_or_else(|p| p.into_inner()).take();
        let Some(mut handle) = handle else {
            return;
        };

        if time::timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
            tracing::warn!("Log trimming pass did not finish in time, aborting it");
            handle.abort();
        }

        tracing::info!("Log trimming service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state
            .timer
            .lock()
            .map(|timer| timer.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Run one pass immediately
    ///
    /// Returns `Ok(None)` if another pass is already in progress.
    pub async fn run_once(&self) -> LogResult<Option<TrimStats>> {
        run_guarded(&self.db, &self.config, &self.state).await.transpose()
    }

    #[cfg(test)]
    fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Main trimming loop
async fn trim_loop(
    db: Arc<LogDb>,
    config: LogTrimmingConfig,
    period: Duration,
    state: Arc<TrimmerState>,
) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = state.wake.notified() => {}
        }

        if state.stop_requested.load(Ordering::Acquire) {
            break;
        }

        match run_guarded(&db, &config, &state).await {
            Some(Ok(stats)) => {
                state.consecutive_failures.store(0, Ordering::Release);
                if stats.expired_deleted > 0 || stats.trimmed_deleted > 0 {
                    tracing::info!(
                        expired_deleted = stats.expired_deleted,
                        trimmed_deleted = stats.trimmed_deleted,
                        functions_checked = stats.functions_checked,
                        "Log trimming pass completed"
                    );
                } else {
                    tracing::debug!(
                        functions_checked = stats.functions_checked,
                        "Log trimming pass completed, nothing to delete"
                    );
                }
            }
            Some(Err(e)) => {
                let failures = state.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                tracing::error!(error = %e, failures, "Log trimming pass failed");

                if failures >= MAX_CONSECUTIVE_FAILURES {
                    tracing::error!(
                        failures,
                        "Too many consecutive log trimming failures, stopping trimming service"
                    );
                    break;
                }
            }
            None => {
                tracing::debug!("Previous log trimming pass still running, skipping");
            }
        }
    }
}

/// Run a pass unless one is already in flight
async fn run_guarded(
    db: &LogDb,
    config: &LogTrimmingConfig,
    state: &TrimmerState,
) -> Option<LogResult<TrimStats>> {
    if state.pass_running.swap(true, Ordering::AcqRel) {
        return None;
    }
    let _running = PassGuard(&state.pass_running);

    Some(trim_pass(db, config, state).await)
}

/// Clears `pass_running` even when an aborted pass is dropped
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn trim_pass(
    db: &LogDb,
    config: &LogTrimmingConfig,
    state: &TrimmerState,
) -> LogResult<TrimStats> {
    let mut stats = TrimStats::default();

    if config.retention_seconds > 0 {
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(config.retention_seconds as i64);
        stats.expired_deleted = db.delete_older_than(cutoff).await?;
        metrics::record_trimmed("age", stats.expired_deleted);
    }

    let max_logs = config.max_logs_per_function.min(i64::MAX as u64) as i64;
    for function_id in db.get_distinct_function_ids().await? {
        if state.stop_requested.load(Ordering::Acquire) {
            stats.interrupted = true;
            break;
        }

        let deleted = db.trim_to_limit(&function_id, max_logs).await?;
        if deleted > 0 {
            tracing::debug!(function_id = %function_id, deleted, "Trimmed function logs");
        }
        stats.trimmed_deleted += deleted;
        stats.functions_checked += 1;
    }
    metrics::record_trimmed("count", stats.trimmed_deleted);

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::database::tests::pending;
    use crate::logs::entry::capture_millis;

    async fn create_test_db() -> Arc<LogDb> {
        Arc::new(LogDb::new("sqlite::memory:").await.unwrap())
    }

    fn config(max_logs_per_function: u64, retention_seconds: u64) -> LogTrimmingConfig {
        LogTrimmingConfig {
            trimming_interval_seconds: 3600,
            max_logs_per_function,
            retention_seconds,
        }
    }

    #[tokio::test]
    async fn test_run_once_applies_both_policies() {
        let db = create_test_db().await;
        let now = capture_millis();

        // Old entry, beyond retention
        db.insert_batch(&[pending(Some("f1"), 1000, 0)]).await.unwrap();
        // Five recent entries for f1, two for f2
        let recent: Vec<_> = (0..5).map(|i| pending(Some("f1"), now, i)).collect();
        db.insert_batch(&recent).await.unwrap();
        db.insert_batch(&[pending(Some("f2"), now, 0), pending(Some("f2"), now, 1)])
            .await
            .unwrap();

        let trimmer = LogTrimmer::new(db.clone(), config(3, 3600));
        let stats = trimmer.run_once().await.unwrap().unwrap();

        assert_eq!(stats.expired_deleted, 1);
        assert_eq!(stats.trimmed_deleted, 2);
        assert_eq!(stats.functions_checked, 2);
        assert_eq!(db.count_by_function("f1").await.unwrap(), 3);
        assert_eq!(db.count_by_function("f2").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_zero_retention_disables_age_policy() {
        let db = create_test_db().await;
        db.insert_batch(&[pending(Some("f1"), 1000, 0)]).await.unwrap();

        let trimmer = LogTrimmer::new(db.clone(), config(10, 0));
        let stats = trimmer.run_once().await.unwrap().unwrap();

        assert_eq!(stats.expired_deleted, 0);
        assert_eq!(db.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_start_runs_first_pass_immediately() {
        let db = create_test_db().await;
        let recent: Vec<_> = (0..4).map(|i| pending(Some("f1"), capture_millis(), i)).collect();
        db.insert_batch(&recent).await.unwrap();

        let trimmer = LogTrimmer::new(db.clone(), config(1, 0));
        assert!(trimmer.start());
        assert!(!trimmer.start());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(db.count_by_function("f1").await.unwrap(), 1);

        trimmer.stop().await;
        assert!(!trimmer.is_running());
    }

    #[tokio::test]
    async fn test_stops_after_consecutive_failures() {
        let db = create_test_db().await;
        db.close().await;

        let trimmer = LogTrimmer::new(db, config(10, 60)).with_interval(Duration::from_millis(10));
        trimmer.start();

        let mut stopped = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if !trimmer.is_running() {
                stopped = true;
                break;
            }
        }

        assert!(stopped, "trimming service should disable itself");
        assert_eq!(
            trimmer.state.consecutive_failures.load(Ordering::Acquire),
            MAX_CONSECUTIVE_FAILURES
        );

        // A disabled service can be started again
        assert!(trimmer.start());
        trimmer.stop().await;
    }

    #[tokio::test]
    async fn test_overlapping_pass_is_skipped() {
        let db = create_test_db().await;
        let trimmer = LogTrimmer::new(db, config(10, 0));

        trimmer.state.pass_running.store(true, Ordering::Release);
        assert_eq!(trimmer.run_once().await.unwrap(), None);

        trimmer.state.pass_running.store(false, Ordering::Release);
        assert!(trimmer.run_once().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stop_request_interrupts_pass() {
        let db = create_test_db().await;
        db.insert_batch(&[pending(Some("f1"), capture_millis(), 0)]).await.unwrap();

        let trimmer = LogTrimmer::new(db, config(10, 0));
        trimmer.state.stop_requested.store(true, Ordering::Release);

        let stats = trimmer.run_once().await.unwrap().unwrap();
        assert!(stats.interrupted);
        assert_eq!(stats.functions_checked, 0);
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let db = create_test_db().await;
        let trimmer = LogTrimmer::new(db, LogTrimmingConfig::default());
        trimmer.stop().await;
        assert!(!trimmer.is_running());
    }
}
