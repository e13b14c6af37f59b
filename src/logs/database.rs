//! SQLite persistence for function logs
//!
//! This module provides async database operations with:
//! - Connection pooling
//! - Automatic migrations
//! - Batch inserts in a single transaction
//! - Serialized writes (batch inserts, retention deletes) behind one lock
//! - WAL mode for concurrent reads/writes

use super::cursor::PaginationCursor;
use super::entry::{millis_to_datetime, LogEntry, LogLevel, PendingLogEntry};
use crate::error::{LogError, LogResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;

pub(crate) const SELECT_COLUMNS: &str =
    "SELECT id, request_id, function_id, level, message, args, sequence, timestamp FROM function_logs";

/// Function log database handle
///
/// Reads go straight to the pool. Every write takes `write_lock` so a flush
/// batch never interleaves with a retention delete.
pub struct LogDb {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl LogDb {
    /// Open (or create) the database and run migrations
    ///
    /// # Example
    ///
    /// ```ignore
    /// let db = LogDb::new("sqlite:./data/function_logs.db").await?;
    /// ```
    pub async fn new(database_url: &str) -> LogResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30))
            .pragma("cache_size", "-16000")
            .pragma("temp_store", "memory")
            .pragma("synchronous", "NORMAL");

        // Every connection to an in-memory database gets its own private
        // database, so pin the pool to a single long-lived connection.
        let in_memory = is_memory_url(database_url);
        let mut pool_options = SqlitePoolOptions::new().acquire_timeout(Duration::from_secs(30));
        pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;

        Self::run_migrations(&pool).await?;

        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    async fn run_migrations(pool: &SqlitePool) -> LogResult<()> {
        sqlx::migrate!("./migrations").run(pool).await?;

        tracing::info!("Function log database migrations completed");
        Ok(())
    }

    /// Insert one flush batch in a single transaction
    ///
    /// Entries keep the `(timestamp, sequence)` they were stamped with in the buffer.
    pub async fn insert_batch(&self, entries: &[PendingLogEntry]) -> LogResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        for pending in entries {
            let entry = &pending.entry;
            sqlx::query(
                "INSERT INTO function_logs (request_id, function_id, level, message, args, sequence, timestamp)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&entry.request_id)
            .bind(&entry.function_id)
            .bind(entry.level.as_str())
            .bind(&entry.message)
            .bind(&entry.args)
            .bind(pending.sequence)
            .bind(pending.timestamp)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    /// Delete every entry captured strictly before `cutoff`
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> LogResult<u64> {
        let _guard = self.write_lock.lock().await;

        let result = sqlx::query("DELETE FROM function_logs WHERE timestamp < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete every entry owned by `function_id`
    pub async fn delete_by_function_id(&self, function_id: &str) -> LogResult<u64> {
        let _guard = self.write_lock.lock().await;

        let result = sqlx::query("DELETE FROM function_logs WHERE function_id = ?")
            .bind(function_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Functions that currently own at least one entry
    pub async fn get_distinct_function_ids(&self) -> LogResult<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT function_id FROM function_logs WHERE function_id IS NOT NULL ORDER BY function_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Keep only the `max_logs` newest entries of `function_id`
    ///
    /// Returns the number of entries deleted (0 when the function has at most
    /// `max_logs` entries).
    pub async fn trim_to_limit(&self, function_id: &str, max_logs: i64) -> LogResult<u64> {
        if max_logs <= 0 {
            return Err(LogError::validation("maxLogs must be a positive integer"));
        }

        let _guard = self.write_lock.lock().await;

        let threshold: Option<(i64, i64, i64)> = sqlx::query_as(
            "SELECT timestamp, sequence, id FROM function_logs
             WHERE function_id = ?
             ORDER BY timestamp DESC, sequence DESC, id DESC
             LIMIT 1 OFFSET ?",
        )
        .bind(function_id)
        .bind(max_logs - 1)
        .fetch_optional(&self.pool)
        .await?;

        let Some((timestamp, sequence, id)) = threshold else {
            return Ok(0);
        };

        let mut delete = QueryBuilder::<Sqlite>::new("DELETE FROM function_logs WHERE function_id = ");
        delete.push_bind(function_id);
        delete.push(" AND ");
        push_before(
            &mut delete,
            &PaginationCursor {
                timestamp,
                sequence,
                id: Some(id),
            },
        );

        let result = delete.build().execute(&self.pool).await?;

        Ok(result.rows_affected())
    }

    /// Total number of stored entries
    pub async fn count(&self) -> LogResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM function_logs")
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }

    pub async fn count_by_function(&self, function_id: &str) -> LogResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM function_logs WHERE function_id = ?")
            .bind(function_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }

    /// Database statistics for the CLI
    pub async fn get_stats(&self) -> LogResult<DatabaseStats> {
        let log_count = self.count().await?;
        let function_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT function_id) FROM function_logs WHERE function_id IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        let orphaned_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM function_logs WHERE function_id IS NULL")
                .fetch_one(&self.pool)
                .await?;

        Ok(DatabaseStats {
            log_count,
            function_count: function_count as u64,
            orphaned_count: orphaned_count as u64,
        })
    }

    /// Close the pool. Flush any `LogService` writing here first.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Database statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub log_count: u64,
    pub function_count: u64,
    pub orphaned_count: u64,
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Append "strictly older than `cursor`" in `(timestamp, sequence, id)` order
pub(crate) fn push_before(builder: &mut QueryBuilder<'_, Sqlite>, cursor: &PaginationCursor) {
    builder.push("(timestamp < ");
    builder.push_bind(cursor.timestamp);
    builder.push(" OR (timestamp = ");
    builder.push_bind(cursor.timestamp);
    builder.push(" AND sequence < ");
    builder.push_bind(cursor.sequence);
    builder.push(")");
    if let Some(id) = cursor.id {
        builder.push(" OR (timestamp = ");
        builder.push_bind(cursor.timestamp);
        builder.push(" AND sequence = ");
        builder.push_bind(cursor.sequence);
        builder.push(" AND id < ");
        builder.push_bind(id);
        builder.push(")");
    }
    builder.push(")");
}

pub(crate) fn row_to_entry(row: &SqliteRow) -> LogResult<LogEntry> {
    let level: String = row.try_get("level")?;
    let level = LogLevel::from_str(&level).map_err(|e| sqlx::Error::Decode(e.into()))?;

    Ok(LogEntry {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        function_id: row.try_get("function_id")?,
        level,
        message: row.try_get("message")?,
        args: row.try_get("args")?,
        sequence: row.try_get("sequence")?,
        timestamp: millis_to_datetime(row.try_get("timestamp")?),
    })
}
