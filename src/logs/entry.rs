//! Log record types shared by the capture, buffering and query layers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Closed set of levels a function log entry can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Log,
    Debug,
    Info,
    Warn,
    Error,
    Trace,
    Stdout,
    Stderr,
    /// Invocation lifecycle, written by the execution host
    ExecStart,
    ExecEnd,
    ExecReject,
}

impl LogLevel {
    pub const ALL: [LogLevel; 11] = [
        LogLevel::Log,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Trace,
        LogLevel::Stdout,
        LogLevel::Stderr,
        LogLevel::ExecStart,
        LogLevel::ExecEnd,
        LogLevel::ExecReject,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Trace => "trace",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::ExecStart => "exec_start",
            Self::ExecEnd => "exec_end",
            Self::ExecReject => "exec_reject",
        }
    }

    pub fn is_console(&self) -> bool {
        matches!(
            self,
            Self::Log | Self::Debug | Self::Info | Self::Warn | Self::Error | Self::Trace
        )
    }

    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::ExecStart | Self::ExecEnd | Self::ExecReject)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogLevel::ALL
            .iter()
            .copied()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| format!("Unknown log level: {}", s))
    }
}

/// Capture event handed to the buffer by the interceptor or the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogEntry {
    pub request_id: String,
    pub function_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
    /// JSON array of the extra positional values, if any
    pub args: Option<String>,
}

/// Entry waiting in the in-memory buffer, stamped at capture time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLogEntry {
    pub entry: NewLogEntry,
    /// Unix milliseconds
    pub timestamp: i64,
    /// Position within the buffer epoch
    pub sequence: i64,
}

/// Persisted function log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: i64,
    pub request_id: String,
    pub function_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
    pub args: Option<String>,
    pub sequence: i64,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

static LAST_STAMP: AtomicI64 = AtomicI64::new(0);

/// Wall-clock Unix milliseconds, never lower than a previously returned value
///
/// Capture timestamps must not go backwards within the process even if the
/// system clock is stepped.
pub fn capture_millis() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);

    let previous = LAST_STAMP.fetch_max(now, Ordering::AcqRel);
    previous.max(now)
}

/// Convert stored epoch milliseconds back to a UTC timestamp
pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_round_trips_through_str() {
        for level in LogLevel::ALL {
            assert_eq!(level.as_str().parse::<LogLevel>().unwrap(), level);
        }
        assert!("fatal".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_level_categories() {
        assert!(LogLevel::Warn.is_console());
        assert!(!LogLevel::Stdout.is_console());
        assert!(LogLevel::ExecReject.is_lifecycle());
        assert!(!LogLevel::Error.is_lifecycle());
    }

    #[test]
    fn test_level_serializes_snake_case() {
        let json = serde_json::to_string(&LogLevel::ExecStart).unwrap();
        assert_eq!(json, "\"exec_start\"");
    }

    #[test]
    fn test_capture_millis_is_monotonic() {
        let mut last = capture_millis();
        for _ in 0..1000 {
            let next = capture_millis();
            assert!(next >= last);
            last = next;
        }
    }
}
