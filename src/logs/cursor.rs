//! Opaque keyset cursors for paginated log queries

use super::entry::LogEntry;
use crate::error::{LogError, LogResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Position in the `(timestamp, sequence, id)` ordering
///
/// Callers only ever see the base64 form produced by [`PaginationCursor::encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationCursor {
    #[serde(rename = "t")]
    pub timestamp: i64,

    #[serde(rename = "s")]
    pub sequence: i64,

    /// Row id tie-break; absent in cursors built from `(timestamp, sequence)` only
    #[serde(rename = "i", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl PaginationCursor {
    pub fn new(timestamp: i64, sequence: i64) -> Self {
        Self {
            timestamp,
            sequence,
            id: None,
        }
    }

    pub fn from_entry(entry: &LogEntry) -> Self {
        Self {
            timestamp: entry.timestamp_millis(),
            sequence: entry.sequence,
            id: Some(entry.id),
        }
    }

    pub fn encode(&self) -> String {
        // Serializing three integers cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        STANDARD.encode(json)
    }

    pub fn decode(raw: &str) -> LogResult<Self> {
        let bytes = STANDARD
            .decode(raw.trim())
            .map_err(|_| LogError::validation("Invalid cursor format"))?;

        serde_json::from_slice(&bytes).map_err(|_| LogError::validation("Invalid cursor format"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_decodes_what_it_encodes() {
        let cursor = PaginationCursor {
            timestamp: 1_767_863_000_123,
            sequence: 7,
            id: Some(42),
        };

        let encoded = cursor.encode();
        assert!(!encoded.contains("sequence"));
        assert_eq!(PaginationCursor::decode(&encoded).unwrap(), cursor);
    }

    #[test]
    fn test_cursor_without_id() {
        let encoded = STANDARD.encode(br#"{"t":1000,"s":3}"#);
        let cursor = PaginationCursor::decode(&encoded).unwrap();
        assert_eq!(cursor, PaginationCursor::new(1000, 3));
    }

    #[test]
    fn test_malformed_cursor_is_validation_error() {
        let wrong_shape = STANDARD.encode(br#"{"t":"x"}"#);
        for raw in ["not base64!!", "", wrong_shape.as_str()] {
            let err = PaginationCursor::decode(raw).unwrap_err();
            assert!(err.is_validation());
            assert_eq!(err.to_string(), "Invalid cursor format");
        }
    }
}
