//! Per-invocation request context
//!
//! Each hosted handler invocation runs inside a [`RequestContext`] scope. The
//! context is a tokio task-local, so it follows the invocation's future across
//! every `.await` and is restored around every poll, which keeps concurrently
//! executing invocations isolated even on a multi-threaded runtime.
//!
//! Tasks spawned from inside a scope do not inherit task-locals on their own;
//! use [`spawn`] / [`spawn_blocking`] to carry the context along.

use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::task::JoinHandle;

/// Identity of the invocation that owns the currently executing code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Correlates every entry produced by one invocation
    pub request_id: String,

    /// Owning function (route). `None` for invocations not bound to a function.
    pub function_id: Option<String>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, function_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            function_id: Some(function_id.into()),
        }
    }
}

tokio::task_local! {
    static CURRENT: RequestContext;
}

/// Run `fut` with `ctx` as the current context for its whole dynamic extent
///
/// Nested calls shadow the outer context and restore it when the inner future
/// completes or is dropped. The output (including any `Err`) is returned as is.
pub async fn run<F>(ctx: RequestContext, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(ctx, fut).await
}

/// Synchronous variant of [`run`]
///
/// The previous context is restored even if `f` panics.
pub fn run_sync<F, R>(ctx: RequestContext, f: F) -> R
where
    F: FnOnce() -> R,
{
    CURRENT.sync_scope(ctx, f)
}

/// The context of the calling code, or `None` outside any scope
pub fn current() -> Option<RequestContext> {
    CURRENT.try_with(|ctx| ctx.clone()).ok()
}

/// Cheaper than [`current`] when only presence matters
pub fn is_active() -> bool {
    CURRENT.try_with(|_| ()).is_ok()
}

/// Spawn a task that inherits the caller's context (if any)
pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match current() {
        Some(ctx) => tokio::spawn(CURRENT.scope(ctx, fut)),
        None => tokio::spawn(fut),
    }
}

/// Run blocking work on the blocking pool, inheriting the caller's context
pub fn spawn_blocking<F, R>(f: F) -> JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let ctx = current();
    tokio::task::spawn_blocking(move || match ctx {
        Some(ctx) => CURRENT.sync_scope(ctx, f),
        None => f(),
    })
}
