//! Read-only queries over persisted function logs
//!
//! These only ever see flushed data; nothing here touches the in-memory buffer.
//! Descending queries order by `(timestamp, sequence, id)` so entries of one
//! batch keep their capture order and pagination never skips or repeats rows.

use super::cursor::PaginationCursor;
use super::database::{push_before, row_to_entry, LogDb, SELECT_COLUMNS};
use super::entry::{LogEntry, LogLevel};
use crate::error::{LogError, LogResult};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};

pub const DEFAULT_RECENT_LIMIT: i64 = 100;
pub const MAX_PAGE_LIMIT: i64 = 1000;

const ORDER_DESC: &str = " ORDER BY timestamp DESC, sequence DESC, id DESC";

/// Parameters of a paginated log query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    /// Restrict to one function
    pub function_id: Option<String>,

    /// Restrict to these levels (empty means all)
    pub levels: Option<Vec<LogLevel>>,

    /// Page size, 1..=1000
    pub limit: i64,

    /// Opaque cursor from a previous page
    pub cursor: Option<String>,
}

/// One page of a paginated log query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedLogs {
    pub logs: Vec<LogEntry>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_cursor: Option<String>,
}

impl LogDb {
    /// All entries of one request in capture order
    pub async fn get_by_request_id(&self, request_id: &str) -> LogResult<Vec<LogEntry>> {
        let rows = sqlx::query(&format!(
            "{} WHERE request_id = ? ORDER BY timestamp ASC, sequence ASC, id ASC",
            SELECT_COLUMNS
        ))
        .bind(request_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    /// Entries of one function, newest first, optionally capped
    pub async fn get_by_function_id(
        &self,
        function_id: &str,
        limit: Option<i64>,
    ) -> LogResult<Vec<LogEntry>> {
        if let Some(limit) = limit {
            validate_positive(limit)?;
        }

        let mut query = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        query.push(" WHERE function_id = ");
        query.push_bind(function_id);
        query.push(ORDER_DESC);
        if let Some(limit) = limit {
            query.push(" LIMIT ");
            query.push_bind(limit);
        }

        let rows = query.build().fetch_all(self.pool()).await?;
        rows.iter().map(row_to_entry).collect()
    }

    /// Page of entries strictly older than `(cursor_timestamp, cursor_sequence)`
    pub async fn get_by_function_id_before_cursor(
        &self,
        function_id: &str,
        cursor_timestamp: i64,
        cursor_sequence: i64,
        limit: i64,
    ) -> LogResult<Vec<LogEntry>> {
        validate_positive(limit)?;

        let mut query = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        query.push(" WHERE function_id = ");
        query.push_bind(function_id);
        query.push(" AND ");
        push_before(&mut query, &PaginationCursor::new(cursor_timestamp, cursor_sequence));
        query.push(ORDER_DESC);
        query.push(" LIMIT ");
        query.push_bind(limit);

        let rows = query.build().fetch_all(self.pool()).await?;
        rows.iter().map(row_to_entry).collect()
    }

    /// Most recent entries across all functions
    pub async fn get_recent(&self, limit: i64) -> LogResult<Vec<LogEntry>> {
        validate_positive(limit)?;

        let mut query = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        query.push(ORDER_DESC);
        query.push(" LIMIT ");
        query.push_bind(limit);

        let rows = query.build().fetch_all(self.pool()).await?;
        rows.iter().map(row_to_entry).collect()
    }

    /// Keyset-paginated query, newest first
    ///
    /// All filters go into one predicate and the page is fetched with
    /// `LIMIT limit + 1`; the extra row only decides `has_more`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let first = db.get_paginated(LogQuery { limit: 50, ..Default::default() }).await?;
    /// let second = db
    ///     .get_paginated(LogQuery { limit: 50, cursor: first.next_cursor, ..Default::default() })
    ///     .await?;
    /// ```
    pub async fn get_paginated(&self, params: LogQuery) -> LogResult<PaginatedLogs> {
        if !(1..=MAX_PAGE_LIMIT).contains(&params.limit) {
            return Err(LogError::validation(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }

        let cursor = params
            .cursor
            .as_deref()
            .map(PaginationCursor::decode)
            .transpose()?;

        let mut query = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        query.push(" WHERE 1=1");

        if let Some(function_id) = &params.function_id {
            query.push(" AND function_id = ");
            query.push_bind(function_id.clone());
        }

        if let Some(levels) = params.levels.as_ref().filter(|levels| !levels.is_empty()) {
            query.push(" AND level IN (");
            let mut separated = query.separated(", ");
            for level in levels {
                separated.push_bind(level.as_str());
            }
            separated.push_unseparated(")");
        }

        if let Some(cursor) = &cursor {
            query.push(" AND ");
            push_before(&mut query, cursor);
        }

        query.push(ORDER_DESC);
        query.push(" LIMIT ");
        query.push_bind(params.limit + 1);

        let rows = query.build().fetch_all(self.pool()).await?;
        let mut logs = rows.iter().map(row_to_entry).collect::<LogResult<Vec<_>>>()?;

        let has_more = logs.len() as i64 > params.limit;
        logs.truncate(params.limit as usize);

        let next_cursor = if has_more {
            logs.last().map(|entry| PaginationCursor::from_entry(entry).encode())
        } else {
            None
        };

        let prev_cursor = if cursor.is_some() {
            logs.first().map(|entry| PaginationCursor::from_entry(entry).encode())
        } else {
            None
        };

        Ok(PaginatedLogs {
            logs,
            has_more,
            next_cursor,
            prev_cursor,
        })
    }
}

fn validate_positive(limit: i64) -> LogResult<()> {
    if limit <= 0 {
        return Err(LogError::validation("limit must be a positive integer"));
    }
    Ok(())
}
