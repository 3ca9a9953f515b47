//! Command, result and history types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where a command came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandSource {
    Ui,
    Voice,
    Remote,
    /// Issued by the daemon itself; never gated
    System,
    /// Issued by the reminder scheduler; never gated
    Timer,
}

impl CommandSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandSource::Ui => "ui",
            CommandSource::Voice => "voice",
            CommandSource::Remote => "remote",
            CommandSource::System => "system",
            CommandSource::Timer => "timer",
        }
    }

    /// Whether the source is internal to the daemon
    pub fn is_internal(self) -> bool {
        matches!(self, CommandSource::System | CommandSource::Timer)
    }
}

impl std::fmt::Display for CommandSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named request; immutable once dispatched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    pub source: CommandSource,
    pub issued_at: DateTime<Utc>,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Map<String, Value>, source: CommandSource) -> Self {
        Self {
            name: name.into(),
            args,
            source,
            issued_at: Utc::now(),
        }
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    pub fn arg_f64(&self, key: &str) -> Option<f64> {
        self.args.get(key).and_then(Value::as_f64)
    }

    pub fn arg_i64(&self, key: &str) -> Option<i64> {
        self.args.get(key).and_then(Value::as_i64)
    }
}

/// Why a command failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    UnknownCommand,
    SourceNotAllowed,
    InvalidArgs,
    ExecutionError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::UnknownCommand => "UNKNOWN_COMMAND",
            ErrorCode::SourceNotAllowed => "SOURCE_NOT_ALLOWED",
            ErrorCode::InvalidArgs => "INVALID_ARGS",
            ErrorCode::ExecutionError => "EXECUTION_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one dispatch; `error` is set exactly when `success` is false
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>, data: Option<Map<String, Value>>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            error: None,
        }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some(code),
        }
    }
}

/// What a handler returns on success
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutcome {
    pub message: String,
    pub data: Option<Map<String, Value>>,
}

impl CommandOutcome {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    /// Attach a data object; non-object values are wrapped as `{"value": ...}`
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(match data {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        });
        self
    }
}

/// One dispatched command and what came of it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub command: Command,
    pub result: CommandResult,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_code_wire_names() {
        assert_eq!(
            serde_json::to_value(ErrorCode::SourceNotAllowed).unwrap(),
            json!("SOURCE_NOT_ALLOWED")
        );
        assert_eq!(ErrorCode::InvalidArgs.to_string(), "INVALID_ARGS");
    }

    #[test]
    fn test_result_shape() {
        let ok = CommandResult::ok("done", None);
        assert!(ok.success && ok.error.is_none());

        let failed = CommandResult::failure(ErrorCode::UnknownCommand, "no such command");
        assert!(!failed.success);
        assert_eq!(failed.error, Some(ErrorCode::UnknownCommand));

        let json = serde_json::to_value(&ok).unwrap();
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_outcome_wraps_scalar_data() {
        let outcome = CommandOutcome::message("hi").with_data(json!(3));
        assert_eq!(outcome.data.unwrap()["value"], json!(3));
    }
}
