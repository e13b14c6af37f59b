//! Routing of console calls and stream writes to capture or passthrough

use super::format::{console_line, console_payload, stream_message, ConsoleArg};
use super::sink::{OutputSink, Stream};
use crate::context::{self, RequestContext};
use crate::logs::{LogLevel, LogRecorder, NewLogEntry};
use std::cell::Cell;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Which output surfaces are captured while installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterceptOptions {
    /// Leveled console calls
    pub console: bool,
    /// Raw stdout/stderr writes
    pub streams: bool,
}

impl Default for InterceptOptions {
    fn default() -> Self {
        Self {
            console: true,
            streams: true,
        }
    }
}

thread_local! {
    // Set while a captured console call writes its rendered line
    static IN_CAPTURED_CONSOLE: Cell<bool> = const { Cell::new(false) };
}

struct ConsoleGuard {
    previous: bool,
}

impl ConsoleGuard {
    fn enter() -> Self {
        Self {
            previous: IN_CAPTURED_CONSOLE.with(|flag| flag.replace(true)),
        }
    }

    fn active() -> bool {
        IN_CAPTURED_CONSOLE.with(Cell::get)
    }
}

impl Drop for ConsoleGuard {
    fn drop(&mut self) {
        IN_CAPTURED_CONSOLE.with(|flag| flag.set(self.previous));
    }
}

/// Output interceptor
///
/// While installed, output produced inside a [`context::run`] scope is stored
/// through the recorder instead of reaching the sink. Output produced outside
/// any scope (system output) always reaches the sink unchanged.
///
/// No method here ever returns an error for captured output.
pub struct Interceptor {
    recorder: Arc<dyn LogRecorder>,
    sink: Arc<dyn OutputSink>,
    options: InterceptOptions,
    installed: AtomicBool,
}

impl Interceptor {
    pub fn new(recorder: Arc<dyn LogRecorder>, sink: Arc<dyn OutputSink>) -> Self {
        Self::with_options(recorder, sink, InterceptOptions::default())
    }

    pub fn with_options(
        recorder: Arc<dyn LogRecorder>,
        sink: Arc<dyn OutputSink>,
        options: InterceptOptions,
    ) -> Self {
        Self {
            recorder,
            sink,
            options,
            installed: AtomicBool::new(false),
        }
    }

    /// Start capturing; returns `false` if already installed
    pub fn install(&self) -> bool {
        let changed = !self.installed.swap(true, Ordering::AcqRel);
        if changed {
            tracing::debug!(
                console = self.options.console,
                streams = self.options.streams,
                "Output interceptor installed"
            );
        }
        changed
    }

    /// Stop capturing; returns `false` if not installed
    pub fn uninstall(&self) -> bool {
        let changed = self.installed.swap(false, Ordering::AcqRel);
        if changed {
            tracing::debug!("Output interceptor uninstalled");
        }
        changed
    }

    pub fn installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }

    pub fn options(&self) -> InterceptOptions {
        self.options
    }

    /// Leveled console call
    ///
    /// The rendered line always goes through [`Interceptor::write_stream`], the
    /// way a console implementation writes to its stream. When the call itself
    /// was captured, that stream write is neither stored again nor forwarded.
    pub fn console(&self, level: LogLevel, args: &[ConsoleArg]) {
        let captured = self.installed() && self.options.console && self.capture_console(level, args);

        let line = console_line(args);
        let stream = console_stream(level);
        let _guard = captured.then(ConsoleGuard::enter);
        let _ = self.write_stream(stream, line.as_bytes());
    }

    /// Raw write to stdout or stderr
    ///
    /// Captured writes report the full input length as written.
    pub fn write_stream(&self, stream: Stream, bytes: &[u8]) -> io::Result<usize> {
        self.write_stream_as(context::current(), stream, bytes)
    }

    /// Raw write attributed to `ctx` instead of the caller's context
    ///
    /// Used for bytes that were produced earlier under another context, such as
    /// a buffered partial line. `None` routes the write as system output.
    pub fn write_stream_as(
        &self,
        ctx: Option<RequestContext>,
        stream: Stream,
        bytes: &[u8],
    ) -> io::Result<usize> {
        if self.installed() {
            let in_console = ConsoleGuard::active();
            if in_console || self.options.streams {
                if let Some(ctx) = ctx {
                    if !in_console {
                        if let Some(message) = stream_message(bytes) {
                            self.recorder.store(NewLogEntry {
                                request_id: ctx.request_id,
                                function_id: ctx.function_id,
                                level: stream_level(stream),
                                message,
                                args: None,
                            });
                        }
                    }
                    return Ok(bytes.len());
                }
            }
        }

        self.sink.write(stream, bytes)
    }

    /// Flush the real device; captured output has nothing to flush
    pub fn flush_stream(&self, stream: Stream) -> io::Result<()> {
        if self.installed() && self.options.streams && context::is_active() {
            return Ok(());
        }
        self.sink.flush(stream)
    }

    fn capture_console(&self, level: LogLevel, args: &[ConsoleArg]) -> bool {
        let Some(ctx) = context::current() else {
            return false;
        };

        let (message, args) = console_payload(args);
        self.recorder.store(NewLogEntry {
            request_id: ctx.request_id,
            function_id: ctx.function_id,
            level,
            message,
            args,
        });
        true
    }
}

/// Stream a rendered console line is written to
pub(crate) fn console_stream(level: LogLevel) -> Stream {
    match level {
        LogLevel::Warn
        | LogLevel::Error
        | LogLevel::Trace
        | LogLevel::Stderr
        | LogLevel::ExecReject => Stream::Stderr,
        _ => Stream::Stdout,
    }
}

fn stream_level(stream: Stream) -> LogLevel {
    match stream {
        Stream::Stdout => LogLevel::Stdout,
        Stream::Stderr => LogLevel::Stderr,
    }
}
