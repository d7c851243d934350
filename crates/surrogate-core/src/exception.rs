//! Structured exception values carried in `exception` responses.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

const TIMEOUT_NAME: &str = "TimeoutError";

fn default_name() -> String {
    "Error".to_string()
}

/// An error raised by a remote function, in a shape that survives JSON.
///
/// Mirrors what an `Error` object looks like after a structured-clone
/// boundary: a name, a message and optionally some extra data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{name}: {message}")]
pub struct Exception {
    #[serde(default = "default_name")]
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Exception {
    /// Create an exception with the given name and message.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            data: None,
        }
    }

    /// Create a plain `Error` exception.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new("Error", message)
    }

    /// Attach extra JSON data.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// The exception raised when a scope has no function of the given name.
    pub fn not_a_function(scope_name: &str, func_name: &str) -> Self {
        Self::new(
            "TypeError",
            format!("{}.{} is not a function", scope_name, func_name),
        )
    }

    /// The exception raised when an argument is missing or has the wrong type.
    pub fn invalid_argument(index: usize, message: impl std::fmt::Display) -> Self {
        Self::new("TypeError", format!("Invalid argument {}: {}", index, message))
    }

    /// The exception answering a request that could not be decoded.
    pub fn malformed_request(reason: impl std::fmt::Display) -> Self {
        Self::new("TypeError", format!("Malformed request: {}", reason))
    }

    /// The exception delivered locally when a pending call times out.
    pub fn timeout(call_id: u64) -> Self {
        Self::new(TIMEOUT_NAME, format!("Call {} timed out", call_id))
    }

    /// Whether this is a locally generated timeout.
    pub fn is_timeout(&self) -> bool {
        self.name == TIMEOUT_NAME
    }

    /// Decode whatever a peer put in an `exception` field.
    ///
    /// Values that are not shaped like an exception are wrapped, keeping the
    /// original value in `data`.
    pub fn from_value(value: Value) -> Self {
        if let Ok(exception) = serde_json::from_value::<Exception>(value.clone()) {
            return exception;
        }
        let message = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self::error(message).with_data(value)
    }

    /// Encode for the wire.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("name".to_string(), Value::String(self.name.clone()));
        obj.insert("message".to_string(), Value::String(self.message.clone()));
        if let Some(data) = &self.data {
            obj.insert("data".to_string(), data.clone());
        }
        Value::Object(obj)
    }
}

impl From<crate::error::SurrogateError> for Exception {
    fn from(err: crate::error::SurrogateError) -> Self {
        Self::new(err.kind_name(), err.to_string())
    }
}
