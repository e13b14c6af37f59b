//! Invocation lifecycle
//!
//! The execution host wraps each handler invocation with [`run_invocation`],
//! which brackets the handler's own output with lifecycle entries and runs it
//! inside its request context.

use crate::context::{self, RequestContext};
use crate::logs::{LogLevel, LogRecorder, NewLogEntry};
use serde_json::json;
use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

/// Run one handler invocation
///
/// Stores `exec_start`, runs `fut` with `ctx` as the current context, then
/// stores `exec_end` on `Ok` or `exec_reject` carrying the error text on `Err`.
/// The handler's result is returned unchanged.
pub async fn run_invocation<F, T, E>(
    recorder: &dyn LogRecorder,
    ctx: RequestContext,
    fut: F,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    let started = Instant::now();
    recorder.store(lifecycle_entry(&ctx, LogLevel::ExecStart, "Execution started".to_string(), None));

    let result = context::run(ctx.clone(), fut).await;
    let duration_ms = started.elapsed().as_millis() as u64;
    let args = Some(json!({ "durationMs": duration_ms }).to_string());

    match &result {
        Ok(_) => recorder.store(lifecycle_entry(
            &ctx,
            LogLevel::ExecEnd,
            "Execution completed".to_string(),
            args,
        )),
        Err(e) => {
            tracing::debug!(
                request_id = %ctx.request_id,
                function_id = ctx.function_id.as_deref().unwrap_or("-"),
                error = %e,
                "Invocation rejected"
            );
            recorder.store(lifecycle_entry(&ctx, LogLevel::ExecReject, e.to_string(), args))
        }
    }

    result
}

fn lifecycle_entry(
    ctx: &RequestContext,
    level: LogLevel,
    message: String,
    args: Option<String>,
) -> NewLogEntry {
    NewLogEntry {
        request_id: ctx.request_id.clone(),
        function_id: ctx.function_id.clone(),
        level,
        message,
        args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::interceptor::tests::RecordingRecorder;

    #[tokio::test]
    async fn test_successful_invocation() {
        let recorder = RecordingRecorder::default();
        let ctx = RequestContext::new("req-ok", "fn-ok");

        let result: Result<u32, String> = run_invocation(&recorder, ctx, async {
            assert_eq!(context::current().unwrap().request_id, "req-ok");
            Ok(7)
        })
        .await;

        assert_eq!(result, Ok(7));
        let levels: Vec<LogLevel> = recorder.entries().iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![LogLevel::ExecStart, LogLevel::ExecEnd]);
        assert!(recorder.entries()[1].args.as_deref().unwrap().contains("durationMs"));
        assert!(!context::is_active());
    }

    #[tokio::test]
    async fn test_rejected_invocation_keeps_error() {
        let recorder = RecordingRecorder::default();
        let ctx = RequestContext::new("req-bad", "fn-bad");

        let result: Result<(), String> =
            run_invocation(&recorder, ctx, async { Err("handler threw".to_string()) }).await;

        assert_eq!(result, Err("handler threw".to_string()));
        let entries = recorder.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].level, LogLevel::ExecReject);
        assert_eq!(entries[1].message, "handler threw");
        assert!(entries.iter().all(|e| e.function_id.as_deref() == Some("fn-bad")));
    }
}
