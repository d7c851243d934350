//! Per-channel diagnostic verbosity and value rendering for logs.
//!
//! Every channel decides for itself how chatty it is. The level gates which
//! `tracing` events a channel emits at all; the subscriber installed by the
//! host still has the final say on what gets printed.

use crate::SurrogateError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Logging verbosity of a channel. The default is `Silent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// No output at all.
    #[default]
    Silent = 0,
    /// Output when something is obviously broken.
    Error = 1,
    /// Output when something might be broken.
    Warning = 2,
    /// Output to say what's going on.
    Debug = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Silent => "SILENT",
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARNING",
            LogLevel::Debug => "DEBUG",
        }
    }

    /// Whether a message of `level` should be emitted under this setting.
    pub fn allows(&self, level: LogLevel) -> bool {
        level != LogLevel::Silent && *self >= level
    }
}

impl FromStr for LogLevel {
    type Err = SurrogateError;

    /// Case-insensitive; `WARN` is accepted for `WARNING`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SILENT" => Ok(LogLevel::Silent),
            "ERROR" => Ok(LogLevel::Error),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "DEBUG" => Ok(LogLevel::Debug),
            _ => Err(SurrogateError::Validation {
                field: "log_level".to_string(),
                message: format!("Unknown log level '{}'", s),
            }),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Render a JSON value for a log line, capped at `limit` characters.
pub fn summarize(value: &Value, limit: usize) -> String {
    truncate(value.to_string(), limit)
}

/// Render call arguments as `a,b,c` (without brackets), capped at `limit`.
pub fn summarize_args(args: &[Value], limit: usize) -> String {
    let joined = args
        .iter()
        .map(|arg| arg.to_string())
        .collect::<Vec<_>>()
        .join(",");
    truncate(joined, limit)
}

fn truncate(mut text: String, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text;
    }
    let cut = text
        .char_indices()
        .nth(limit)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    let dropped = text[cut..].chars().count();
    text.truncate(cut);
    text.push_str(&format!("...(+{} chars)", dropped));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_level_ordering_gates_output() {
        assert!(LogLevel::Debug.allows(LogLevel::Error));
        assert!(LogLevel::Warning.allows(LogLevel::Warning));
        assert!(!LogLevel::Error.allows(LogLevel::Warning));
        assert!(!LogLevel::Silent.allows(LogLevel::Error));
        assert!(!LogLevel::Debug.allows(LogLevel::Silent));
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!(
            LogLevel::from_str(&LogLevel::Error.to_string()).unwrap(),
            LogLevel::Error
        );
        assert!(matches!(
            "loud".parse::<LogLevel>(),
            Err(SurrogateError::Validation { .. })
        ));
        assert_eq!(LogLevel::default(), LogLevel::Silent);
    }

    #[test]
    fn test_summarize_short_value_untouched() {
        assert_eq!(summarize(&json!({"a": 1}), 64), r#"{"a":1}"#);
    }

    #[test]
    fn test_summarize_caps_long_value() {
        let long = json!("x".repeat(100));
        let rendered = summarize(&long, 10);
        assert!(rendered.starts_with("\"xxxxxxxxx"));
        assert!(rendered.ends_with("...(+92 chars)"));
    }

    #[test]
    fn test_summarize_args_joins() {
        assert_eq!(summarize_args(&[json!(2), json!("b")], 64), r#"2,"b""#);
        assert_eq!(summarize_args(&[], 64), "");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let rendered = truncate("ééééé".to_string(), 2);
        assert!(rendered.starts_with("éé..."));
    }
}
