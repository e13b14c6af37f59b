//! Payload serialization for captured console calls and stream writes

use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// One positional argument of a console call
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleArg {
    /// Value that serialized to JSON
    Value(Value),
    /// Value whose serialization failed, kept as its debug rendering
    Coerced(String),
}

impl ConsoleArg {
    /// Serialize `value`, falling back to its `Debug` text if that fails
    pub fn from_serialize<T>(value: &T) -> Self
    where
        T: Serialize + fmt::Debug + ?Sized,
    {
        match serde_json::to_value(value) {
            Ok(value) => Self::Value(value),
            Err(_) => Self::Coerced(format!("{:?}", value)),
        }
    }

    /// Text form used for `message` and for passthrough rendering
    ///
    /// Strings stay raw, numbers/booleans/null use their literal form and
    /// structured values are JSON-encoded.
    pub fn render(&self) -> String {
        match self {
            Self::Value(Value::String(s)) => s.clone(),
            Self::Value(Value::Number(n)) => n.to_string(),
            Self::Value(Value::Null) => "null".to_string(),
            Self::Value(value) => {
                serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
            }
            Self::Coerced(text) => text.clone(),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::Coerced(text) => Value::String(text.clone()),
        }
    }
}

impl From<&str> for ConsoleArg {
    fn from(value: &str) -> Self {
        Self::Value(Value::String(value.to_string()))
    }
}

impl From<String> for ConsoleArg {
    fn from(value: String) -> Self {
        Self::Value(Value::String(value))
    }
}

impl From<Value> for ConsoleArg {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Split console arguments into the stored `message` and `args`
///
/// The first argument becomes the message; the rest become a JSON array, or
/// `None` when there are no extra arguments.
pub fn console_payload(args: &[ConsoleArg]) -> (String, Option<String>) {
    let Some((first, rest)) = args.split_first() else {
        return (String::new(), None);
    };

    let message = first.render();
    if rest.is_empty() {
        return (message, None);
    }

    let extra = Value::Array(rest.iter().map(ConsoleArg::to_json).collect());
    let args = serde_json::to_string(&extra).unwrap_or_else(|_| extra.to_string());
    (message, Some(args))
}

/// Line written to the real device for an uncaptured console call
pub fn console_line(args: &[ConsoleArg]) -> String {
    let mut line = args
        .iter()
        .map(ConsoleArg::render)
        .collect::<Vec<_>>()
        .join(" ");
    line.push('\n');
    line
}

/// Message stored for a raw stream write
///
/// Exactly one trailing newline is stripped; `None` means nothing is left to store.
pub fn stream_message(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let message = text.strip_suffix('\n').unwrap_or(&*text);
    if message.is_empty() {
        None
    } else {
        Some(message.to_string())
    }
}
