//! Output capture
//!
//! An [`Interceptor`] decides, per call, whether console output and raw
//! stdout/stderr writes belong to a function invocation (a request context is
//! active) or to the host itself. Invocation output is turned into log entries;
//! host output reaches the real device untouched.
//!
//! Code that should be captured writes through this module: the `console_*!`
//! macros, [`stdout`] / [`stderr`] handles, or [`write_fd`]. Those entry
//! points resolve the process-wide interceptor registered with [`set_global`].

pub mod format;
pub mod interceptor;
pub mod sink;
pub mod stream;

pub use format::{console_line, console_payload, stream_message, ConsoleArg};
pub use interceptor::{InterceptOptions, Interceptor};
pub use sink::{MemorySink, OutputSink, StdioSink, Stream};
pub use stream::{write_fd, CapturedStream};

use crate::logs::LogLevel;
use arc_swap::ArcSwapOption;
use std::sync::Arc;

static GLOBAL: ArcSwapOption<Interceptor> = ArcSwapOption::const_empty();

/// Currently registered process-wide interceptor
pub fn global() -> Option<Arc<Interceptor>> {
    GLOBAL.load_full()
}

/// Register the process-wide interceptor, returning the one it replaces
///
/// Registration does not install it; call [`Interceptor::install`] separately.
pub fn set_global(interceptor: Arc<Interceptor>) -> Option<Arc<Interceptor>> {
    GLOBAL.swap(Some(interceptor))
}

pub fn clear_global() -> Option<Arc<Interceptor>> {
    GLOBAL.swap(None)
}

/// Leveled console call through the process-wide interceptor
///
/// Without one registered, the rendered line goes straight to the real device.
pub fn console(level: LogLevel, args: &[ConsoleArg]) {
    match global() {
        Some(interceptor) => interceptor.console(level, args),
        None => {
            let line = console_line(args);
            let _ = StdioSink.write(interceptor::console_stream(level), line.as_bytes());
        }
    }
}

pub fn stdout() -> CapturedStream {
    CapturedStream::global(Stream::Stdout)
}

pub fn stderr() -> CapturedStream {
    CapturedStream::global(Stream::Stderr)
}

#[doc(hidden)]
#[macro_export]
macro_rules! __console_at {
    ($level:expr $(, $arg:expr)* $(,)?) => {
        $crate::capture::console(
            $level,
            &[$($crate::capture::ConsoleArg::from_serialize(&$arg)),*],
        )
    };
}

/// `console.log` equivalent: `console_log!("user", id, &payload)`
#[macro_export]
macro_rules! console_log {
    ($($arg:expr),* $(,)?) => {
        $crate::__console_at!($crate::logs::LogLevel::Log $(, $arg)*)
    };
}

#[macro_export]
macro_rules! console_info {
    ($($arg:expr),* $(,)?) => {
        $crate::__console_at!($crate::logs::LogLevel::Info $(, $arg)*)
    };
}

#[macro_export]
macro_rules! console_warn {
    ($($arg:expr),* $(,)?) => {
        $crate::__console_at!($crate::logs::LogLevel::Warn $(, $arg)*)
    };
}

#[macro_export]
macro_rules! console_error {
    ($($arg:expr),* $(,)?) => {
        $crate::__console_at!($crate::logs::LogLevel::Error $(, $arg)*)
    };
}

#[macro_export]
macro_rules! console_debug {
    ($($arg:expr),* $(,)?) => {
        $crate::__console_at!($crate::logs::LogLevel::Debug $(, $arg)*)
    };
}

#[macro_export]
macro_rules! console_trace {
    ($($arg:expr),* $(,)?) => {
        $crate::__console_at!($crate::logs::LogLevel::Trace $(, $arg)*)
    };
}
