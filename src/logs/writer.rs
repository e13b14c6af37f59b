//! Buffered, batched log writer
//!
//! `store` is the only call allowed on a handler's hot path: it stamps the entry,
//! appends it to an in-memory buffer and at most signals the background flush
//! worker. The worker drains the buffer on two triggers:
//! - the buffer reached `max_batch_size` (flush as soon as the worker runs)
//! - `max_delay` elapsed since the first entry of the current buffer epoch
//!
//! Only one flush runs at a time. A flush swaps the buffer out atomically so
//! concurrent `store` calls fill a fresh epoch, writes the batch in one
//! transaction, retries once on failure and then drops the batch.

use super::cursor::PaginationCursor;
use super::database::LogDb;
use super::entry::{capture_millis, LogEntry, NewLogEntry, PendingLogEntry};
use super::query::{LogQuery, PaginatedLogs, DEFAULT_RECENT_LIMIT};
use crate::error::LogResult;
use crate::metrics;
use crate::registry::FunctionRegistry;
use crate::settings::{
    BatchTunables, SettingsProvider, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_DELAY_MS,
    DEFAULT_SETTINGS_REFRESH_INTERVAL_MS,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Sink for captured entries
///
/// Implementations must return promptly and never fail the caller.
pub trait LogRecorder: Send + Sync {
    fn store(&self, entry: NewLogEntry);
}

/// Construction parameters for [`LogService`]
#[derive(Clone)]
pub struct LogServiceOptions {
    pub max_batch_size: usize,
    pub max_delay: Duration,
    pub settings_refresh_interval: Duration,
    /// Upper bound on waiting for an in-flight flush during shutdown
    pub shutdown_timeout: Duration,
    pub settings: Option<Arc<dyn SettingsProvider>>,
    pub registry: Option<Arc<dyn FunctionRegistry>>,
}

impl Default for LogServiceOptions {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            settings_refresh_interval: Duration::from_millis(DEFAULT_SETTINGS_REFRESH_INTERVAL_MS),
            shutdown_timeout: Duration::from_secs(5),
            settings: None,
            registry: None,
        }
    }
}

/// Result of one `flush` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another flush was already running
    Skipped,
    /// Nothing was buffered
    Empty,
    Written(usize),
    /// Both attempts failed; the entries are gone
    Dropped(usize),
}

#[derive(Default)]
struct Buffer {
    entries: Vec<PendingLogEntry>,
    flush_at: Option<Instant>,
    flush_now: bool,
}

enum NextFlush {
    Now,
    At(Instant),
    Idle,
}

struct Inner {
    db: Arc<LogDb>,
    buffer: Mutex<Buffer>,
    wake: Arc<Notify>,
    flushing: AtomicBool,
    shutdown: AtomicBool,
    tunables: BatchTunables,
    settings: Option<Arc<dyn SettingsProvider>>,
    registry: Option<Arc<dyn FunctionRegistry>>,
    shutdown_timeout: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Function log service handle
///
/// Cheap to clone; all clones share one buffer and one flush worker. Dropping
/// the last clone stops the worker without draining; call
/// [`LogService::shutdown`] first to persist buffered entries.
#[derive(Clone)]
pub struct LogService {
    inner: Arc<Inner>,
}

impl LogService {
    /// Create the service and spawn its flush worker
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let service = LogService::spawn(db, LogServiceOptions::default());
    /// service.store(entry); // Non-blocking
    /// service.shutdown().await;
    /// ```
    pub fn spawn(db: Arc<LogDb>, options: LogServiceOptions) -> Self {
        let tunables = BatchTunables::new(
            options.max_batch_size,
            options.max_delay.as_millis() as u64,
            options.settings_refresh_interval,
        );
        if let Some(settings) = &options.settings {
            tunables.refresh(settings.as_ref());
        }

        let inner = Arc::new(Inner {
            db,
            buffer: Mutex::new(Buffer::default()),
            wake: Arc::new(Notify::new()),
            flushing: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            tunables,
            settings: options.settings,
            registry: options.registry,
            shutdown_timeout: options.shutdown_timeout,
            worker: Mutex::new(None),
        });

        let handle = tokio::spawn(flush_worker(Arc::downgrade(&inner), inner.wake.clone()));
        *lock(&inner.worker) = Some(handle);

        Self { inner }
    }

    /// Write buffered entries now
    pub async fn flush(&self) -> FlushOutcome {
        self.inner.flush().await
    }

    /// Stop accepting entries and drain the buffer
    ///
    /// Call this before closing the database.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        {
            let mut buffer = lock(&inner.buffer);
            if inner.shutdown.swap(true, Ordering::AcqRel) {
                return;
            }
            buffer.flush_at = None;
            buffer.flush_now = false;
        }

        tracing::info!("Function log service shutting down");
        inner.wake.notify_one();

        let handle = lock(&inner.worker).take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(inner.shutdown_timeout, &mut handle).await.is_err() {
                tracing::warn!("Flush worker did not stop in time, aborting it");
                handle.abort();
            }
        }

        let deadline = Instant::now() + inner.shutdown_timeout;
        while inner.flushing.load(Ordering::Acquire) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        match inner.flush().await {
            FlushOutcome::Written(count) => {
                tracing::info!(count, "Drained remaining function logs");
            }
            FlushOutcome::Skipped => {
                tracing::warn!("A flush was still running at shutdown; remaining entries may be lost");
            }
            _ => {}
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Entries waiting for the next flush
    pub fn pending_count(&self) -> usize {
        lock(&self.inner.buffer).entries.len()
    }

    pub fn max_batch_size(&self) -> usize {
        self.inner.tunables.max_batch_size()
    }

    pub fn max_delay(&self) -> Duration {
        self.inner.tunables.max_delay()
    }

    pub fn db(&self) -> &Arc<LogDb> {
        &self.inner.db
    }

    pub async fn get_by_request_id(&self, request_id: &str) -> LogResult<Vec<LogEntry>> {
        self.inner.db.get_by_request_id(request_id).await
    }

    pub async fn get_by_function_id(
        &self,
        function_id: &str,
        limit: Option<i64>,
    ) -> LogResult<Vec<LogEntry>> {
        self.inner.db.get_by_function_id(function_id, limit).await
    }

    pub async fn get_by_function_id_before_cursor(
        &self,
        function_id: &str,
        cursor: PaginationCursor,
        limit: i64,
    ) -> LogResult<Vec<LogEntry>> {
        self.inner
            .db
            .get_by_function_id_before_cursor(function_id, cursor.timestamp, cursor.sequence, limit)
            .await
    }

    pub async fn get_recent(&self, limit: Option<i64>) -> LogResult<Vec<LogEntry>> {
        self.inner.db.get_recent(limit.unwrap_or(DEFAULT_RECENT_LIMIT)).await
    }

    pub async fn get_paginated(&self, params: LogQuery) -> LogResult<PaginatedLogs> {
        self.inner.db.get_paginated(params).await
    }

    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> LogResult<u64> {
        self.inner.db.delete_older_than(cutoff).await
    }

    pub async fn delete_by_function_id(&self, function_id: &str) -> LogResult<u64> {
        self.inner.db.delete_by_function_id(function_id).await
    }

    pub async fn get_distinct_function_ids(&self) -> LogResult<Vec<String>> {
        self.inner.db.get_distinct_function_ids().await
    }

    pub async fn trim_to_limit(&self, function_id: &str, max_logs: i64) -> LogResult<u64> {
        self.inner.db.trim_to_limit(function_id, max_logs).await
    }
}

impl LogRecorder for LogService {
    fn store(&self, entry: NewLogEntry) {
        let inner = &self.inner;
        let level = entry.level;
        let max_batch_size = inner.tunables.max_batch_size();

        let wake = {
            let mut buffer = lock(&inner.buffer);
            if inner.shutdown.load(Ordering::Acquire) {
                drop(buffer);
                metrics::record_dropped("shutdown", 1);
                return;
            }

            // Position within the current buffer epoch
            let sequence = buffer.entries.len() as i64;
            buffer.entries.push(PendingLogEntry {
                entry,
                timestamp: capture_millis(),
                sequence,
            });

            if buffer.entries.len() >= max_batch_size {
                buffer.flush_now = true;
                true
            } else if buffer.flush_at.is_none() {
                buffer.flush_at = Some(Instant::now() + inner.tunables.max_delay());
                true
            } else {
                false
            }
        };

        if wake {
            inner.wake.notify_one();
        }
        metrics::record_captured(level.as_str());
    }
}

impl Inner {
    fn next_flush(&self) -> NextFlush {
        let mut buffer = lock(&self.buffer);
        if buffer.entries.is_empty() {
            buffer.flush_at = None;
            buffer.flush_now = false;
            return NextFlush::Idle;
        }
        if buffer.flush_now {
            return NextFlush::Now;
        }

        let flush_at = *buffer
            .flush_at
            .get_or_insert_with(|| Instant::now() + self.tunables.max_delay());
        if flush_at <= Instant::now() {
            NextFlush::Now
        } else {
            NextFlush::At(flush_at)
        }
    }

    async fn flush(&self) -> FlushOutcome {
        if self.flushing.swap(true, Ordering::AcqRel) {
            return FlushOutcome::Skipped;
        }
        let _flushing = FlushingGuard(&self.flushing);

        let mut batch = {
            let mut buffer = lock(&self.buffer);
            buffer.flush_at = None;
            buffer.flush_now = false;
            std::mem::take(&mut buffer.entries)
        };

        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        if let Some(registry) = &self.registry {
            for pending in batch.iter_mut() {
                let deleted = pending
                    .entry
                    .function_id
                    .as_deref()
                    .is_some_and(|id| !registry.contains(id));
                if deleted {
                    pending.entry.function_id = None;
                }
            }
        }

        let outcome = self.write_batch(&batch).await;

        if let (FlushOutcome::Written(_), Some(settings)) = (outcome, &self.settings) {
            self.tunables.refresh_if_due(settings.as_ref());
        }

        outcome
    }

    async fn write_batch(&self, batch: &[PendingLogEntry]) -> FlushOutcome {
        let count = batch.len();
        let start = Instant::now();

        let result = retry_once(count, || self.db.insert_batch(batch)).await;

        match result {
            Ok(()) => {
                let elapsed = start.elapsed();
                tracing::debug!(
                    count,
                    duration_ms = elapsed.as_millis() as u64,
                    "Flushed function log batch"
                );
                metrics::record_flush(count as u64, elapsed);
                FlushOutcome::Written(count)
            }
            Err(e) => {
                tracing::error!(error = %e, count, "Dropping function log batch after retry");
                metrics::record_dropped("write_failed", count as u64);
                FlushOutcome::Dropped(count)
            }
        }
    }
}

/// Run `attempt`, and run it once more if the first try fails
async fn retry_once<F, Fut>(count: usize, mut attempt: F) -> LogResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LogResult<()>>,
{
    match attempt().await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::warn!(error = %e, count, "Function log batch write failed, retrying once");
            attempt().await
        }
    }
}

/// Clears the in-progress flag even if the flush future is dropped mid-write
struct FlushingGuard<'a>(&'a AtomicBool);

impl Drop for FlushingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Let an idle worker observe that the service is gone
        self.wake.notify_one();
    }
}

/// Background flush worker
///
/// Sleeps until the earliest flush trigger, flushes, and repeats until shutdown
/// or until every [`LogService`] handle is dropped. Only a weak reference is
/// held while waiting.
async fn flush_worker(inner: Weak<Inner>, wake: Arc<Notify>) {
    loop {
        let Some(strong) = inner.upgrade() else {
            break;
        };
        if strong.shutdown.load(Ordering::Acquire) {
            break;
        }

        let next = strong.next_flush();
        if let NextFlush::Now = next {
            let outcome = strong.flush().await;
            drop(strong);
            if outcome == FlushOutcome::Skipped {
                // An explicit flush() is running; let it finish
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            continue;
        }
        drop(strong);

        match next {
            NextFlush::At(deadline) => {
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = tokio::time::sleep_until(deadline.into()) => {}
                }
            }
            NextFlush::Idle => wake.notified().await,
            NextFlush::Now => {}
        }
    }

    tracing::debug!("Function log flush worker stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LogError;
    use crate::logs::database::LogDb;
    use crate::logs::entry::LogLevel;
    use crate::registry::InMemoryFunctionRegistry;
    use crate::settings::{SharedSettings, MAX_BATCH_SIZE_KEY};

    async fn create_test_db() -> Arc<LogDb> {
        Arc::new(LogDb::new("sqlite::memory:").await.unwrap())
    }

    fn entry(request_id: &str, function_id: &str, message: &str) -> NewLogEntry {
        NewLogEntry {
            request_id: request_id.to_string(),
            function_id: Some(function_id.to_string()),
            level: LogLevel::Log,
            message: message.to_string(),
            args: None,
        }
    }

    fn options(max_batch_size: usize, max_delay: Duration) -> LogServiceOptions {
        LogServiceOptions {
            max_batch_size,
            max_delay,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_delayed_flush() {
        let db = create_test_db().await;
        let service = LogService::spawn(db.clone(), options(10, Duration::from_millis(50)));

        for i in 0..5 {
            service.store(entry("req123", "f1", &format!("Message {}", i)));
        }
        assert_eq!(service.pending_count(), 5);

        tokio::time::sleep(Duration::from_millis(300)).await;

        let logs = db.get_by_request_id("req123").await.unwrap();
        assert_eq!(logs.len(), 5);
        let sequences: Vec<i64> = logs.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        assert_eq!(service.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_full_batch_flushes_without_waiting_for_delay() {
        let db = create_test_db().await;
        let batch_size = 3;
        let service = LogService::spawn(db.clone(), options(batch_size, Duration::from_secs(60)));

        for i in 0..batch_size {
            service.store(entry("batch_req", "f1", &format!("Batch message {}", i)));
        }

        tokio::time::sleep(Duration::from_millis(200)).await;

        let logs = db.get_by_request_id("batch_req").await.unwrap();
        assert_eq!(logs.len(), batch_size);
    }

    #[tokio::test]
    async fn test_explicit_flush_writes_buffer() {
        let db = create_test_db().await;
        let service = LogService::spawn(db.clone(), options(100, Duration::from_secs(60)));

        service.store(entry("req-1", "f1", "hello"));
        service.store(entry("req-1", "f1", "world"));

        assert_eq!(service.flush().await, FlushOutcome::Written(2));
        assert_eq!(service.flush().await, FlushOutcome::Empty);

        let logs = db.get_by_request_id("req-1").await.unwrap();
        let messages: Vec<&str> = logs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["hello", "world"]);
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_rejects_new_entries() {
        let db = create_test_db().await;
        let service = LogService::spawn(db.clone(), options(100, Duration::from_secs(60)));

        service.store(entry("req-1", "f1", "before shutdown"));
        service.shutdown().await;
        service.store(entry("req-1", "f1", "after shutdown"));

        assert!(service.is_shutdown());
        assert_eq!(service.pending_count(), 0);
        let logs = db.get_by_request_id("req-1").await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "before shutdown");

        // Second shutdown is a no-op
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_batch_is_dropped_after_retry() {
        let db = create_test_db().await;
        let service = LogService::spawn(db.clone(), options(100, Duration::from_secs(60)));

        service.store(entry("req-1", "f1", "lost"));
        db.close().await;

        assert_eq!(service.flush().await, FlushOutcome::Dropped(1));
        assert_eq!(service.pending_count(), 0);

        // The pipeline keeps accepting entries afterwards
        service.store(entry("req-2", "f1", "next"));
        assert_eq!(service.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_succeeds_on_retry() {
        let db = create_test_db().await;
        let attempts = std::sync::atomic::AtomicUsize::new(0);
        let batch = vec![PendingLogEntry {
            entry: entry("req-1", "f1", "second try"),
            timestamp: capture_millis(),
            sequence: 0,
        }];

        let result = retry_once(1, || {
            let first = attempts.fetch_add(1, Ordering::SeqCst) == 0;
            let db = db.clone();
            let batch = batch.clone();
            async move {
                if first {
                    return Err(LogError::validation("database is locked"));
                }
                db.insert_batch(&batch).await
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        let logs = db.get_by_request_id("req-1").await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "second try");
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_second_failure() {
        let attempts = std::sync::atomic::AtomicUsize::new(0);

        let result = retry_once(3, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(LogError::validation("disk I/O error")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_deleted_function_entries_become_orphans() {
        let db = create_test_db().await;
        let registry = Arc::new(InMemoryFunctionRegistry::new(["live"]));
        let service = LogService::spawn(
            db.clone(),
            LogServiceOptions {
                max_batch_size: 100,
                max_delay: Duration::from_secs(60),
                registry: Some(registry),
                ..Default::default()
            },
        );

        service.store(entry("req-1", "live", "kept"));
        service.store(entry("req-1", "gone", "orphaned"));
        service.flush().await;

        let logs = db.get_by_request_id("req-1").await.unwrap();
        assert_eq!(logs[0].function_id.as_deref(), Some("live"));
        assert_eq!(logs[1].function_id, None);
    }

    #[tokio::test]
    async fn test_settings_refresh_after_flush() {
        let db = create_test_db().await;
        let settings = Arc::new(SharedSettings::default());
        let service = LogService::spawn(
            db.clone(),
            LogServiceOptions {
                max_batch_size: 100,
                max_delay: Duration::from_secs(60),
                settings_refresh_interval: Duration::ZERO,
                settings: Some(settings.clone()),
                ..Default::default()
            },
        );
        assert_eq!(service.max_batch_size(), 100);

        settings.set(MAX_BATCH_SIZE_KEY, "7");
        // Not re-read on store
        service.store(entry("req-1", "f1", "x"));
        assert_eq!(service.max_batch_size(), 100);

        service.flush().await;
        assert_eq!(service.max_batch_size(), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers() {
        let db = create_test_db().await;
        let service = LogService::spawn(db.clone(), options(16, Duration::from_millis(5)));

        let mut handles = Vec::new();
        for producer in 0..8 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..100 {
                    service.store(entry(
                        &format!("req-{}", producer),
                        "f1",
                        &format!("{}", i),
                    ));
                    if i % 10 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        service.shutdown().await;

        assert_eq!(db.count().await.unwrap(), 800);
        for producer in 0..8 {
            let logs = db.get_by_request_id(&format!("req-{}", producer)).await.unwrap();
            let mut messages: Vec<i64> =
                logs.iter().map(|e| e.message.parse().unwrap()).collect();
            messages.sort_unstable();
            assert_eq!(messages, (0..100).collect::<Vec<_>>(), "producer {}", producer);
        }
    }

    #[tokio::test]
    async fn test_dropping_last_handle_stops_worker() {
        let db = create_test_db().await;
        let service = LogService::spawn(db.clone(), options(100, Duration::from_millis(20)));
        service.store(entry("req-1", "f1", "buffered"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(db.count().await.unwrap(), 1);

        drop(service);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Worker released its reference to the pool
        assert_eq!(Arc::strong_count(&db), 1);
    }

    #[tokio::test]
    async fn test_sequence_restarts_at_each_epoch() {
        let db = create_test_db().await;
        let service = LogService::spawn(db.clone(), options(100, Duration::from_secs(60)));

        for i in 0..3 {
            service.store(entry("req-1", "f1", &format!("first {}", i)));
        }
        assert_eq!(service.flush().await, FlushOutcome::Written(3));
        for i in 0..2 {
            service.store(entry("req-1", "f1", &format!("second {}", i)));
        }
        assert_eq!(service.flush().await, FlushOutcome::Written(2));

        let logs = db.get_by_request_id("req-1").await.unwrap();
        let mut sequences: Vec<(String, i64)> =
            logs.into_iter().map(|e| (e.message, e.sequence)).collect();
        sequences.sort();
        assert_eq!(
            sequences,
            vec![
                ("first 0".to_string(), 0),
                ("first 1".to_string(), 1),
                ("first 2".to_string(), 2),
                ("second 0".to_string(), 0),
                ("second 1".to_string(), 1),
            ]
        );
    }
}
