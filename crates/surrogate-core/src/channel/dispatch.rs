//! Server-side calling conventions.
//!
//! Every supplied scope ends up as an [`AsyncScope`]: a named bag of
//! functions each returning a future of `Result<Value, Exception>`.
//! The two older conventions adapt into it:
//!
//! - **NORMAL** ([`SyncScope`]): the function returns synchronously, so the
//!   future is already complete when the dispatcher first polls it.
//! - **LACO** ([`LacoScope`], last-argument callback object): the function
//!   receives a [`Completion`] and calls exactly one of `callback`/`errback`,
//!   now or later.

use crate::exception::Exception;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Result of running one remote function.
pub type CallResult = std::result::Result<Value, Exception>;

/// A scope whose functions are asynchronous.
#[async_trait]
pub trait AsyncScope: Send + Sync + 'static {
    /// Run `func_name(args...)`.
    async fn call(&self, func_name: &str, args: Vec<Value>) -> CallResult;

    /// Whether the scope has a function of this name.
    ///
    /// The dispatcher answers calls to missing functions with a `TypeError`
    /// without invoking `call`.
    fn responds_to(&self, _func_name: &str) -> bool {
        true
    }
}

/// A scope whose functions return synchronously (NORMAL convention).
pub trait SyncScope: Send + Sync + 'static {
    fn call(&self, func_name: &str, args: Vec<Value>) -> CallResult;

    fn responds_to(&self, _func_name: &str) -> bool {
        true
    }
}

/// A scope whose functions report through a trailing [`Completion`] (LACO
/// convention).
pub trait LacoScope: Send + Sync + 'static {
    fn call(&self, func_name: &str, args: Vec<Value>, completion: Completion);

    fn responds_to(&self, _func_name: &str) -> bool {
        true
    }
}

impl<S: SyncScope + ?Sized> SyncScope for Arc<S> {
    fn call(&self, func_name: &str, args: Vec<Value>) -> CallResult {
        (**self).call(func_name, args)
    }

    fn responds_to(&self, func_name: &str) -> bool {
        (**self).responds_to(func_name)
    }
}

impl<S: LacoScope + ?Sized> LacoScope for Arc<S> {
    fn call(&self, func_name: &str, args: Vec<Value>, completion: Completion) {
        (**self).call(func_name, args, completion)
    }

    fn responds_to(&self, func_name: &str) -> bool {
        (**self).responds_to(func_name)
    }
}

/// The `{callback, errback}` object handed to a LACO function.
///
/// Both methods consume the completion, so at most one of them runs. A
/// completion dropped without either is reported to the caller as a
/// `BrokenPromise` exception.
pub struct Completion {
    func_name: String,
    sender: Option<oneshot::Sender<CallResult>>,
}

impl Completion {
    fn new(func_name: &str, sender: oneshot::Sender<CallResult>) -> Self {
        Self {
            func_name: func_name.to_string(),
            sender: Some(sender),
        }
    }

    /// Report success.
    pub fn callback(self, reply: Value) {
        self.complete(Ok(reply));
    }

    /// Report failure.
    pub fn errback(self, exception: Exception) {
        self.complete(Err(exception));
    }

    pub fn complete(mut self, result: CallResult) {
        if let Some(sender) = self.sender.take() {
            // The receiver is gone only if the channel itself went away.
            let _ = sender.send(result);
        }
    }

    /// Name of the function this completion answers for.
    pub fn func_name(&self) -> &str {
        &self.func_name
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Err(Exception::new(
                "BrokenPromise",
                format!("{} dropped its completion without replying", self.func_name),
            )));
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("func_name", &self.func_name)
            .field("pending", &self.sender.is_some())
            .finish()
    }
}

/// Which convention a scope was supplied with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Normal,
    Laco,
    Async,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Normal => "normal",
            ScopeKind::Laco => "laco",
            ScopeKind::Async => "async",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub(crate) struct NormalAdapter<S>(pub S);

#[async_trait]
impl<S: SyncScope> AsyncScope for NormalAdapter<S> {
    async fn call(&self, func_name: &str, args: Vec<Value>) -> CallResult {
        self.0.call(func_name, args)
    }

    fn responds_to(&self, func_name: &str) -> bool {
        self.0.responds_to(func_name)
    }
}

pub(crate) struct LacoAdapter<S>(pub S);

#[async_trait]
impl<S: LacoScope> AsyncScope for LacoAdapter<S> {
    async fn call(&self, func_name: &str, args: Vec<Value>) -> CallResult {
        let (tx, rx) = oneshot::channel();
        self.0.call(func_name, args, Completion::new(func_name, tx));
        // Completion's Drop always sends, so a closed channel cannot be observed here.
        rx.await.unwrap_or_else(|_| {
            Err(Exception::new(
                "BrokenPromise",
                format!("{} lost its completion", func_name),
            ))
        })
    }

    fn responds_to(&self, func_name: &str) -> bool {
        self.0.responds_to(func_name)
    }
}

/// Decode positional argument `index` into `T`.
///
/// A missing argument decodes from `null`, so `Option<T>` parameters may be
/// omitted by the caller.
pub fn arg<T: DeserializeOwned>(args: &[Value], index: usize) -> std::result::Result<T, Exception> {
    let value = args.get(index).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| Exception::invalid_argument(index, e))
}

type MethodFn = Box<dyn Fn(Vec<Value>) -> CallResult + Send + Sync>;
type LacoMethodFn = Box<dyn Fn(Vec<Value>, Completion) + Send + Sync>;
type AsyncMethodFn = Box<dyn Fn(Vec<Value>) -> BoxFuture<'static, CallResult> + Send + Sync>;

/// A NORMAL scope assembled from closures, one per function name.
#[derive(Default)]
pub struct Methods {
    methods: HashMap<String, MethodFn>,
}

impl Methods {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(Vec<Value>) -> CallResult + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Box::new(method));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        sorted_names(self.methods.keys())
    }
}

impl SyncScope for Methods {
    fn call(&self, func_name: &str, args: Vec<Value>) -> CallResult {
        match self.methods.get(func_name) {
            Some(method) => method(args),
            None => Err(Exception::not_a_function("this", func_name)),
        }
    }

    fn responds_to(&self, func_name: &str) -> bool {
        self.methods.contains_key(func_name)
    }
}

/// A LACO scope assembled from closures, one per function name.
#[derive(Default)]
pub struct LacoMethods {
    methods: HashMap<String, LacoMethodFn>,
}

impl LacoMethods {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(Vec<Value>, Completion) + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Box::new(method));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        sorted_names(self.methods.keys())
    }
}

impl LacoScope for LacoMethods {
    fn call(&self, func_name: &str, args: Vec<Value>, completion: Completion) {
        match self.methods.get(func_name) {
            Some(method) => method(args, completion),
            None => completion.errback(Exception::not_a_function("this", func_name)),
        }
    }

    fn responds_to(&self, func_name: &str) -> bool {
        self.methods.contains_key(func_name)
    }
}

/// An async scope assembled from closures returning futures.
#[derive(Default)]
pub struct AsyncMethods {
    methods: HashMap<String, AsyncMethodFn>,
}

impl AsyncMethods {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F, Fut>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        self.methods
            .insert(name.into(), Box::new(move |args| method(args).boxed()));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        sorted_names(self.methods.keys())
    }
}

#[async_trait]
impl AsyncScope for AsyncMethods {
    async fn call(&self, func_name: &str, args: Vec<Value>) -> CallResult {
        match self.methods.get(func_name) {
            Some(method) => method(args).await,
            None => Err(Exception::not_a_function("this", func_name)),
        }
    }

    fn responds_to(&self, func_name: &str) -> bool {
        self.methods.contains_key(func_name)
    }
}

fn sorted_names<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<&'a str> {
    let mut names: Vec<&str> = keys.map(String::as_str).collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;

    fn math() -> Methods {
        Methods::new()
            .with("add", |args| {
                let a: i64 = arg(&args, 0)?;
                let b: i64 = arg(&args, 1)?;
                Ok(json!(a + b))
            })
            .with("fail", |_| Err(Exception::error("nope")))
    }

    #[test]
    fn test_methods_dispatch_by_name() {
        let scope = math();
        assert_eq!(scope.call("add", vec![json!(2), json!(3)]), Ok(json!(5)));
        assert_eq!(
            scope.call("fail", vec![]).unwrap_err().message,
            "nope"
        );
        assert!(scope.responds_to("add"));
        assert!(!scope.responds_to("mul"));
        assert_eq!(scope.names(), vec!["add", "fail"]);
    }

    #[test]
    fn test_arg_type_mismatch_is_type_error() {
        let err = math().call("add", vec![json!("two"), json!(3)]).unwrap_err();
        assert_eq!(err.name, "TypeError");
        assert!(err.message.starts_with("Invalid argument 0"));
    }

    #[test]
    fn test_arg_missing_decodes_as_null() {
        let missing: Option<String> = arg(&[], 0).unwrap();
        assert!(missing.is_none());
        assert!(arg::<i64>(&[], 0).is_err());
    }

    #[test]
    fn test_normal_adapter_completes_immediately() {
        let adapter = NormalAdapter(math());
        let result = adapter.call("add", vec![json!(1), json!(1)]).now_or_never();
        assert_eq!(result, Some(Ok(json!(2))));
    }

    #[test]
    fn test_laco_adapter_with_synchronous_callback_completes_immediately() {
        let adapter = LacoAdapter(
            LacoMethods::new().with("read", |_, completion| completion.callback(json!("contents"))),
        );
        let result = adapter.call("read", vec![json!("/x")]).now_or_never();
        assert_eq!(result, Some(Ok(json!("contents"))));
    }

    #[test]
    fn test_dropped_completion_is_broken_promise() {
        let adapter = LacoAdapter(LacoMethods::new().with("forget", |_, completion| drop(completion)));
        let result = adapter.call("forget", vec![]).now_or_never().unwrap();
        let err = result.unwrap_err();
        assert_eq!(err.name, "BrokenPromise");
        assert!(err.message.contains("forget"));
    }

    #[tokio::test]
    async fn test_laco_adapter_waits_for_deferred_callback() {
        let adapter = LacoAdapter(LacoMethods::new().with("later", |_, completion| {
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                completion.errback(Exception::error("late failure"));
            });
        }));
        let err = adapter.call("later", vec![]).await.unwrap_err();
        assert_eq!(err.message, "late failure");
    }

    #[tokio::test]
    async fn test_async_methods() {
        let scope = AsyncMethods::new().with("double", |args| async move {
            let n: i64 = arg(&args, 0)?;
            Ok::<Value, Exception>(json!(n * 2))
        });
        assert_eq!(scope.call("double", vec![json!(21)]).await, Ok(json!(42)));
        assert!(scope.call("triple", vec![]).await.is_err());
    }
}
