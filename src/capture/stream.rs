//! Stream entry points
//!
//! Two independent surfaces reach the interceptor:
//! - [`CapturedStream`], a line-buffered `io::Write` handle, so `write!` /
//!   `writeln!` output is delivered one complete line at a time
//! - [`write_fd`], an unbuffered descriptor-style write where every call is
//!   delivered as is

use super::interceptor::Interceptor;
use super::sink::{OutputSink, StdioSink, Stream};
use crate::context::{self, RequestContext};
use std::io;
use std::sync::Arc;

/// Line-buffered `io::Write` handle for stdout or stderr
///
/// A handle built with [`CapturedStream::global`] resolves the process-wide
/// interceptor on every delivered line, so it keeps working across
/// install/uninstall and interceptor replacement. Pending partial lines are
/// delivered on `flush` and on drop.
///
/// Buffered bytes stay attributed to the context they were written in. A write
/// from a different context (or from outside any context) first delivers the
/// pending bytes under their original owner.
pub struct CapturedStream {
    stream: Stream,
    interceptor: Option<Arc<Interceptor>>,
    pending: Vec<u8>,
    owner: Option<RequestContext>,
}

impl CapturedStream {
    pub fn new(interceptor: Arc<Interceptor>, stream: Stream) -> Self {
        Self {
            stream,
            interceptor: Some(interceptor),
            pending: Vec::new(),
            owner: None,
        }
    }

    pub fn global(stream: Stream) -> Self {
        Self {
            stream,
            interceptor: None,
            pending: Vec::new(),
            owner: None,
        }
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }

    fn deliver(&self, owner: Option<RequestContext>, bytes: &[u8]) -> io::Result<usize> {
        match self.interceptor.clone().or_else(super::global) {
            Some(interceptor) => interceptor.write_stream_as(owner, self.stream, bytes),
            None => StdioSink.write(self.stream, bytes),
        }
    }

    fn deliver_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        let owner = self.owner.take();
        self.deliver(owner, &pending).map(|_| ())
    }
}

impl io::Write for CapturedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let current = context::current();
        if !self.pending.is_empty() && self.owner != current {
            self.deliver_pending()?;
        }
        if self.pending.is_empty() {
            self.owner = current;
        }
        self.pending.extend_from_slice(buf);

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let rest = self.pending.split_off(pos + 1);
            let line = std::mem::replace(&mut self.pending, rest);
            self.deliver(self.owner.clone(), &line)?;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.deliver_pending()?;
        match self.interceptor.clone().or_else(super::global) {
            Some(interceptor) => interceptor.flush_stream(self.stream),
            None => StdioSink.flush(self.stream),
        }
    }
}

impl Drop for CapturedStream {
    fn drop(&mut self) {
        let _ = self.deliver_pending();
    }
}

/// Descriptor-style write through the process-wide interceptor
///
/// Only descriptors 1 and 2 are accepted.
pub fn write_fd(fd: i32, bytes: &[u8]) -> io::Result<usize> {
    let stream = Stream::from_fd(fd).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("descriptor {} is not a standard output stream", fd),
        )
    })?;

    match super::global() {
        Some(interceptor) => interceptor.write_stream(stream, bytes),
        None => StdioSink.write(stream, bytes),
    }
}
