//! Real output devices behind the interceptor

use std::fmt;
use std::io::{self, Write};
use std::sync::Mutex;

/// Standard output channel a write is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    /// Map a file descriptor number to a standard stream
    pub fn from_fd(fd: i32) -> Option<Self> {
        match fd {
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            _ => None,
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Destination for writes that are not captured
pub trait OutputSink: Send + Sync {
    /// Write all of `bytes`, returning how many were written
    fn write(&self, stream: Stream, bytes: &[u8]) -> io::Result<usize>;

    fn flush(&self, stream: Stream) -> io::Result<()>;
}

/// The process's real stdout/stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioSink;

impl OutputSink for StdioSink {
    fn write(&self, stream: Stream, bytes: &[u8]) -> io::Result<usize> {
        match stream {
            Stream::Stdout => io::stdout().lock().write_all(bytes)?,
            Stream::Stderr => io::stderr().lock().write_all(bytes)?,
        }
        Ok(bytes.len())
    }

    fn flush(&self, stream: Stream) -> io::Result<()> {
        match stream {
            Stream::Stdout => io::stdout().lock().flush(),
            Stream::Stderr => io::stderr().lock().flush(),
        }
    }
}

/// In-memory sink, for embedding hosts that collect system output themselves
#[derive(Debug, Default)]
pub struct MemorySink {
    stdout: Mutex<Vec<u8>>,
    stderr: Mutex<Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(&self, stream: Stream) -> &Mutex<Vec<u8>> {
        match stream {
            Stream::Stdout => &self.stdout,
            Stream::Stderr => &self.stderr,
        }
    }

    /// Everything written to `stream` so far, lossily decoded
    pub fn contents(&self, stream: Stream) -> String {
        let buffer = self.buffer(stream).lock().unwrap_or_else(|p| p.into_inner());
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl OutputSink for MemorySink {
    fn write(&self, stream: Stream, bytes: &[u8]) -> io::Result<usize> {
        self.buffer(stream)
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&self, _stream: Stream) -> io::Result<()> {
        Ok(())
    }
}
