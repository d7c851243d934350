//! Configuration for channels and transports.
//!
//! `ChannelConfig` carries the per-channel options recognized at
//! construction. `TransportConfig` holds the fixed limits of the socket
//! transport.

use crate::diagnostics::LogLevel;
use crate::exception::Exception;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Fallback handler for exception responses nobody asked to handle.
pub type DefaultErrback = Arc<dyn Fn(Exception) + Send + Sync>;

/// Options recognized when constructing a channel.
#[derive(Clone)]
pub struct ChannelConfig {
    /// Label used in diagnostics.
    pub name: String,
    /// Verbosity of this channel's diagnostics.
    pub log_level: LogLevel,
    /// Invoked when an exception response arrives for a call without errback.
    pub default_errback: Option<DefaultErrback>,
    /// Drop unresolved calls after this long. `None` waits forever.
    pub call_timeout: Option<Duration>,
    /// Maximum characters of any value rendered into a log line.
    pub log_value_limit: usize,
}

impl ChannelConfig {
    pub const DEFAULT_NAME: &'static str = "surrogate";
    pub const DEFAULT_LOG_VALUE_LIMIT: usize = 256;

    /// Create a config with the given diagnostic label.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = log_level;
        self
    }

    pub fn with_default_errback<F>(mut self, errback: F) -> Self
    where
        F: Fn(Exception) + Send + Sync + 'static,
    {
        self.default_errback = Some(Arc::new(errback));
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_log_value_limit(mut self, limit: usize) -> Self {
        self.log_value_limit = limit;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: Self::DEFAULT_NAME.to_string(),
            log_level: LogLevel::Silent,
            default_errback: None,
            call_timeout: None,
            log_value_limit: Self::DEFAULT_LOG_VALUE_LIMIT,
        }
    }
}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("name", &self.name)
            .field("log_level", &self.log_level)
            .field("default_errback", &self.default_errback.is_some())
            .field("call_timeout", &self.call_timeout)
            .field("log_value_limit", &self.log_value_limit)
            .finish()
    }
}

/// Limits of the TCP socket transport.
pub struct TransportConfig;

impl TransportConfig {
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
    pub const MAX_CONNECTIONS: usize = 32;
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_silent_and_unbounded() {
        let config = ChannelConfig::default();
        assert_eq!(config.name, "surrogate");
        assert_eq!(config.log_level, LogLevel::Silent);
        assert!(config.default_errback.is_none());
        assert!(config.call_timeout.is_none());
        assert_eq!(config.log_value_limit, 256);
    }

    #[test]
    fn test_builder_sets_options() {
        let config = ChannelConfig::new("page")
            .with_log_level(LogLevel::Debug)
            .with_call_timeout(Duration::from_millis(500))
            .with_log_value_limit(32)
            .with_default_errback(|_| {});
        assert_eq!(config.name, "page");
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.call_timeout, Some(Duration::from_millis(500)));
        assert_eq!(config.log_value_limit, 32);
        assert!(config.default_errback.is_some());
    }

    #[test]
    fn test_debug_hides_errback_closure() {
        let config = ChannelConfig::new("dbg").with_default_errback(|_| {});
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("default_errback: true"));
    }
}
