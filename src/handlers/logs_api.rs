//! Function log HTTP API handlers
//!
//! Thin adapter over [`LogService`]: parses query parameters, checks the
//! function registry and maps library errors onto HTTP status codes.

use crate::error::{AppError, LogError};
use crate::logs::{LogEntry, LogLevel, LogQuery, LogService, PaginatedLogs};
use crate::logs::query::DEFAULT_RECENT_LIMIT;
use crate::registry::FunctionRegistry;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared state for the log API
#[derive(Clone)]
pub struct LogsApiState {
    pub service: LogService,
    /// When set, unknown function ids answer 404
    pub registry: Option<Arc<dyn FunctionRegistry>>,
}

/// Query parameters for paginated log listings
#[derive(Debug, Default, Deserialize)]
pub struct LogsQueryParams {
    /// Page size (1-1000)
    #[serde(default = "default_limit")]
    pub limit: i64,

    /// Cursor from a previous page's `nextCursor`
    pub cursor: Option<String>,

    /// Comma-separated level filter, e.g. `warn,error`
    pub levels: Option<String>,
}

fn default_limit() -> i64 {
    DEFAULT_RECENT_LIMIT
}

/// Response for request log lookup
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLogsResponse {
    pub request_id: String,
    pub logs: Vec<LogEntry>,
}

/// Response for function log deletion
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: u64,
}

/// Parse `levels=warn, error` into a level list; empty input means no filter
pub fn parse_levels(raw: Option<&str>) -> Result<Option<Vec<LogLevel>>, AppError> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    let levels = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<LogLevel>().map_err(AppError::BadRequest))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(if levels.is_empty() { None } else { Some(levels) })
}

impl LogsApiState {
    fn ensure_function_exists(&self, function_id: &str) -> Result<(), AppError> {
        match &self.registry {
            Some(registry) if !registry.contains(function_id) => {
                Err(LogError::NotFound(function_id.to_string()).into())
            }
            _ => Ok(()),
        }
    }

    async fn paginate(
        &self,
        function_id: Option<String>,
        params: LogsQueryParams,
    ) -> Result<Json<PaginatedLogs>, AppError> {
        let query = LogQuery {
            function_id,
            levels: parse_levels(params.levels.as_deref())?,
            limit: params.limit,
            cursor: params.cursor,
        };

        Ok(Json(self.service.get_paginated(query).await?))
    }
}

/// GET /api/v1/functions/:function_id/logs - One page of a function's logs
///
/// Example: GET /api/v1/functions/hello/logs?limit=50&levels=warn,error
pub async fn get_function_logs(
    State(state): State<LogsApiState>,
    Path(function_id): Path<String>,
    Query(params): Query<LogsQueryParams>,
) -> Result<Json<PaginatedLogs>, AppError> {
    state.ensure_function_exists(&function_id)?;
    state.paginate(Some(function_id), params).await
}

/// DELETE /api/v1/functions/:function_id/logs - Remove all of a function's logs
pub async fn delete_function_logs(
    State(state): State<LogsApiState>,
    Path(function_id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    state.ensure_function_exists(&function_id)?;
    let deleted = state.service.delete_by_function_id(&function_id).await?;

    tracing::info!(function_id = %function_id, deleted, "Function logs deleted");
    Ok(Json(DeleteResponse { deleted }))
}

/// GET /api/v1/requests/:request_id/logs - Every entry of one invocation, oldest first
pub async fn get_request_logs(
    State(state): State<LogsApiState>,
    Path(request_id): Path<String>,
) -> Result<Json<RequestLogsResponse>, AppError> {
    let logs = state.service.get_by_request_id(&request_id).await?;
    Ok(Json(RequestLogsResponse { request_id, logs }))
}

/// GET /api/v1/logs - One page across all functions
pub async fn list_logs(
    State(state): State<LogsApiState>,
    Query(params): Query<LogsQueryParams>,
) -> Result<Json<PaginatedLogs>, AppError> {
    state.paginate(None, params).await
}

/// Health check endpoint
pub async fn health(State(state): State<LogsApiState>) -> impl IntoResponse {
    let status = if state.service.is_shutdown() { "shutting_down" } else { "healthy" };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": status,
            "component": "function-logs",
            "pendingEntries": state.service.pending_count(),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limit() {
        let params: LogsQueryParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.limit, 100);
        assert!(params.cursor.is_none());
        assert!(params.levels.is_none());
    }

    #[test]
    fn test_parse_levels() {
        assert_eq!(parse_levels(None).unwrap(), None);
        assert_eq!(parse_levels(Some("")).unwrap(), None);
        assert_eq!(
            parse_levels(Some("warn, error,,exec_reject")).unwrap(),
            Some(vec![LogLevel::Warn, LogLevel::Error, LogLevel::ExecReject])
        );
    }

    #[test]
    fn test_parse_levels_rejects_unknown() {
        let err = parse_levels(Some("info,loud")).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(msg) if msg.contains("loud")));
    }
}
