//! Function log pipeline
//!
//! ## Architecture
//!
//! ```text
//! Capture (interceptor / host lifecycle)
//!     ↓  store(), non-blocking
//! Buffer (LogService, single background flush worker)
//!     ↓  batched insert, one retry
//! Persistence (SQLite) ← queries, deletes, LogTrimmer
//! ```

pub mod cursor;
pub mod database;
pub mod entry;
pub mod query;
pub mod retention;
pub mod writer;

pub use cursor::PaginationCursor;
pub use database::{DatabaseStats, LogDb};
pub use entry::{LogEntry, LogLevel, NewLogEntry};
pub use query::{LogQuery, PaginatedLogs};
pub use retention::{LogTrimmer, LogTrimmingConfig, TrimStats};
pub use writer::{FlushOutcome, LogRecorder, LogService, LogServiceOptions};
