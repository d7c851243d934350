//! Continuations attached to a client-side call.

use crate::exception::Exception;
use serde_json::Value;
use std::fmt;

pub(crate) type Callback = Box<dyn FnOnce(Value) + Send>;
pub(crate) type Errback = Box<dyn FnOnce(Exception) + Send>;
pub(crate) type Finback = Box<dyn FnOnce() + Send>;

/// What to run when a remote call finishes.
///
/// `callback` receives the reply, `errback` the exception, and `finback`
/// runs after either of them. All are optional; a bare closure converts into
/// options with just a `callback`.
#[derive(Default)]
pub struct CallOptions {
    pub(crate) callback: Option<Callback>,
    pub(crate) errback: Option<Errback>,
    pub(crate) finback: Option<Finback>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Value) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn errback<F>(mut self, errback: F) -> Self
    where
        F: FnOnce(Exception) + Send + 'static,
    {
        self.errback = Some(Box::new(errback));
        self
    }

    pub fn finback<F>(mut self, finback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.finback = Some(Box::new(finback));
        self
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    pub fn has_errback(&self) -> bool {
        self.errback.is_some()
    }

    pub fn has_finback(&self) -> bool {
        self.finback.is_some()
    }
}

impl<F> From<F> for CallOptions
where
    F: FnOnce(Value) + Send + 'static,
{
    fn from(callback: F) -> Self {
        CallOptions::new().callback(callback)
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("callback", &self.has_callback())
            .field("errback", &self.has_errback())
            .field("finback", &self.has_finback())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_converts_to_callback_only() {
        let options: CallOptions = (|_reply: Value| {}).into();
        assert!(options.has_callback());
        assert!(!options.has_errback());
        assert!(!options.has_finback());
    }

    #[test]
    fn test_builder_collects_handlers() {
        let options = CallOptions::new()
            .callback(|_| {})
            .errback(|_| {})
            .finback(|| {});
        assert_eq!(
            format!("{:?}", options),
            "CallOptions { callback: true, errback: true, finback: true }"
        );
    }
}
