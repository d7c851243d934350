//! Error types for Surrogate channels.
//!
//! Two layers of failure exist. `SurrogateError` covers things that go wrong
//! locally and synchronously (bad registration, missing runtime, socket I/O).
//! `CallError` is what the future-based client API hands back when a remote
//! call does not produce a reply. Failures that happen on the far side of a
//! channel always travel as data, see [`Exception`].

use crate::exception::Exception;
use std::net::SocketAddr;
use thiserror::Error;

/// Main error type for local channel operations.
#[derive(Debug, Error)]
pub enum SurrogateError {
    // Transport errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to connect to {addr}: {reason}")]
    ConnectFailed { addr: SocketAddr, reason: String },

    #[error("Frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Setup errors
    #[error("No async runtime available: {context}")]
    NoRuntime { context: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },
}

/// Result type alias for local channel operations.
pub type Result<T> = std::result::Result<T, SurrogateError>;

impl From<std::io::Error> for SurrogateError {
    fn from(err: std::io::Error) -> Self {
        SurrogateError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for SurrogateError {
    fn from(err: serde_json::Error) -> Self {
        SurrogateError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl SurrogateError {
    /// Short, stable name of the error kind, used as an exception name when a
    /// local failure has to be reported to a peer.
    pub fn kind_name(&self) -> &'static str {
        match self {
            SurrogateError::Io { .. } => "IoError",
            SurrogateError::ConnectFailed { .. } => "ConnectError",
            SurrogateError::FrameTooLarge { .. } => "RangeError",
            SurrogateError::Json { .. } => "SyntaxError",
            SurrogateError::NoRuntime { .. } => "RuntimeError",
            SurrogateError::Validation { .. } => "TypeError",
        }
    }
}

/// Why a future-based remote call did not yield a reply value.
#[derive(Debug, Error)]
pub enum CallError {
    /// The remote function failed; the exception came back over the wire.
    #[error("Remote exception: {0}")]
    Remote(Exception),

    /// The channel's call timeout elapsed before a response arrived.
    #[error("Remote call timed out")]
    Timeout,

    /// The pending call was discarded without ever being resolved.
    #[error("Remote call abandoned before a response arrived")]
    Abandoned,

    #[error("Failed to encode argument: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode reply: {0}")]
    Decode(#[source] serde_json::Error),
}

impl CallError {
    /// The remote exception, if this error carries one.
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            CallError::Remote(exception) => Some(exception),
            _ => None,
        }
    }
}

impl From<Exception> for CallError {
    fn from(exception: Exception) -> Self {
        if exception.is_timeout() {
            CallError::Timeout
        } else {
            CallError::Remote(exception)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion_keeps_source() {
        let err: SurrogateError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed").into();
        match err {
            SurrogateError::Io { message, source } => {
                assert!(message.contains("pipe closed"));
                assert!(source.is_some());
            }
            other => panic!("Expected Io, got: {:?}", other),
        }
    }

    #[test]
    fn test_json_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: SurrogateError = parse_err.into();
        assert_eq!(err.kind_name(), "SyntaxError");
        assert!(err.to_string().starts_with("JSON error"));
    }

    #[test]
    fn test_timeout_exception_maps_to_timeout_call_error() {
        let err: CallError = Exception::timeout(7).into();
        assert!(matches!(err, CallError::Timeout));
        assert!(err.exception().is_none());
    }

    #[test]
    fn test_remote_exception_is_preserved() {
        let err: CallError = Exception::new("Error", "div0").into();
        assert_eq!(err.exception().map(|e| e.message.as_str()), Some("div0"));
    }
}
