//! Bidirectional RPC endpoint bound to one transport.
//!
//! A channel is both a client and a server:
//!
//! - **Client**: `require(scope)` hands out a [`Proxy`]; each call on it
//!   allocates an id, records a pending call and posts a request.
//! - **Server**: `supply*` registers scopes; inbound requests are executed
//!   against them and answered with a reply or an exception.
//! - **Router**: the single inbound entry point telling requests and
//!   responses apart.
//!
//! # Thread Safety
//!
//! `Channel` is a cheap `Clone` around shared state. The call registry and the
//! scope table sit behind their own locks, and no lock is held while a
//! transport posts or a user continuation runs, so continuations may call
//! back into the channel.

mod deferred;
mod dispatch;
mod options;
mod proxy;
mod registry;

pub use dispatch::{
    arg, AsyncMethods, AsyncScope, CallResult, Completion, LacoMethods, LacoScope, Methods,
    ScopeKind, SyncScope,
};
pub use options::CallOptions;
pub use proxy::Proxy;

use crate::config::ChannelConfig;
use crate::diagnostics::{summarize, summarize_args, LogLevel};
use crate::error::CallError;
use crate::exception::Exception;
use crate::protocol::{request_call_id, Message, Outcome, Request, Response};
use crate::transport::{LoopbackTransport, Transport};
use crate::{Result, SurrogateError};
use dispatch::{LacoAdapter, NormalAdapter};
use futures::future::BoxFuture;
use futures::FutureExt;
use registry::{CallRegistry, PendingCall};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// A scope registered on this channel.
#[derive(Clone)]
struct ExposedScope {
    handler: Arc<dyn AsyncScope>,
    kind: ScopeKind,
}

struct ChannelInner {
    config: ChannelConfig,
    transport: Arc<dyn Transport>,
    registry: Mutex<CallRegistry>,
    scopes: RwLock<HashMap<String, ExposedScope>>,
}

/// One RPC endpoint bound to one transport.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Bind a channel to `transport` and subscribe to its messages.
    pub fn new(transport: Arc<dyn Transport>, config: ChannelConfig) -> Result<Self> {
        let inner = Arc::new(ChannelInner {
            config,
            transport,
            registry: Mutex::new(CallRegistry::new()),
            scopes: RwLock::new(HashMap::new()),
        });

        let weak: Weak<ChannelInner> = Arc::downgrade(&inner);
        inner.transport.on_message(Arc::new(move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.route_message(message);
            }
        }))?;

        if inner.logs(LogLevel::Debug) {
            debug!(channel = %inner.config.name, "Channel created");
        }

        Ok(Self { inner })
    }

    /// A channel whose transport delivers back to itself, asynchronously.
    ///
    /// Must be called inside a tokio runtime.
    pub fn loopback(config: ChannelConfig) -> Result<Self> {
        Self::new(LoopbackTransport::new(), config)
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    // ========================================================================
    // Client side
    // ========================================================================

    /// Get a proxy for the scope the other side supplied under `scope_name`.
    ///
    /// Nothing is checked here; calls to a scope the peer never supplied are
    /// dropped on the far side.
    pub fn require(&self, scope_name: impl Into<String>) -> Proxy {
        Proxy::new(self.clone(), scope_name.into())
    }

    /// Start a remote call and return its call id.
    ///
    /// The reply or exception is delivered to `options` later.
    pub fn call(
        &self,
        scope_name: &str,
        func_name: &str,
        args: Vec<Value>,
        options: impl Into<CallOptions>,
    ) -> u64 {
        self.inner
            .begin_remote_call(scope_name, func_name, args, options.into())
    }

    /// Start a remote call and get a future of its outcome.
    ///
    /// The request is posted before this returns; awaiting the future only
    /// waits for the response.
    pub fn invoke(
        &self,
        scope_name: &str,
        func_name: &str,
        args: Vec<Value>,
    ) -> impl Future<Output = std::result::Result<Value, CallError>> + Send + 'static {
        let (tx, rx) = oneshot::channel::<std::result::Result<Value, Exception>>();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let err_slot = slot.clone();

        let options = CallOptions::new()
            .callback(move |reply| {
                if let Some(tx) = take_sender(&slot) {
                    let _ = tx.send(Ok(reply));
                }
            })
            .errback(move |exception| {
                if let Some(tx) = take_sender(&err_slot) {
                    let _ = tx.send(Err(exception));
                }
            });

        self.inner
            .begin_remote_call(scope_name, func_name, args, options);

        async move {
            match rx.await {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(exception)) => Err(CallError::from(exception)),
                Err(_) => Err(CallError::Abandoned),
            }
        }
    }

    /// Ids of calls still waiting for a response, ascending.
    pub fn pending_calls(&self) -> Vec<u64> {
        self.inner.lock_registry().ids()
    }

    // ========================================================================
    // Server side
    // ========================================================================

    /// Expose `scope` under `scope_name` with the NORMAL convention.
    pub fn supply<S: SyncScope>(&self, scope_name: impl Into<String>, scope: S) -> Result<()> {
        self.inner
            .expose(scope_name.into(), Arc::new(NormalAdapter(scope)), ScopeKind::Normal)
    }

    /// Expose `scope` under `scope_name` with the LACO convention.
    pub fn supply_laco_async<S: LacoScope>(
        &self,
        scope_name: impl Into<String>,
        scope: S,
    ) -> Result<()> {
        self.inner
            .expose(scope_name.into(), Arc::new(LacoAdapter(scope)), ScopeKind::Laco)
    }

    /// Expose a natively asynchronous scope under `scope_name`.
    pub fn supply_async<S: AsyncScope>(&self, scope_name: impl Into<String>, scope: S) -> Result<()> {
        self.inner
            .expose(scope_name.into(), Arc::new(scope), ScopeKind::Async)
    }

    /// Stop exposing a scope. Returns whether it was registered.
    pub fn withdraw(&self, scope_name: &str) -> bool {
        let removed = self.inner.write_scopes().remove(scope_name).is_some();
        if removed && self.inner.logs(LogLevel::Debug) {
            debug!(channel = %self.inner.config.name, scope = scope_name, "Scope withdrawn");
        }
        removed
    }

    /// Names of the supplied scopes, sorted.
    pub fn scope_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read_scopes().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Convention a scope was supplied with.
    pub fn scope_kind(&self, scope_name: &str) -> Option<ScopeKind> {
        self.inner.read_scopes().get(scope_name).map(|scope| scope.kind)
    }
}

fn take_sender<T>(slot: &Mutex<Option<oneshot::Sender<T>>>) -> Option<oneshot::Sender<T>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.config.name)
            .field("pending_calls", &self.inner.lock_registry().len())
            .field("scopes", &self.scope_names())
            .finish()
    }
}

impl ChannelInner {
    fn logs(&self, level: LogLevel) -> bool {
        self.config.log_level.allows(level)
    }

    fn lock_registry(&self) -> MutexGuard<'_, CallRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_scopes(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ExposedScope>> {
        self.scopes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_scopes(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, ExposedScope>> {
        self.scopes.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------------
    // Router
    // ------------------------------------------------------------------------

    /// Send a message either to the execution point or the termination point.
    fn route_message(self: &Arc<Self>, message: Value) {
        let request_id = request_call_id(&message);
        match Message::decode(message) {
            Ok(Message::Request(request)) => self.execute_call(request),
            Ok(Message::Response(response)) => self.end_remote_call(response),
            Err(e) => match request_id {
                // A broken request that still names its call gets an answer.
                Some(call_id) => {
                    if self.logs(LogLevel::Warning) {
                        warn!(channel = %self.config.name, call_id, "Rejecting malformed request: {}", e);
                    }
                    self.respond(call_id, Err(Exception::malformed_request(&e)));
                }
                None => {
                    if self.logs(LogLevel::Error) {
                        error!(channel = %self.config.name, "Dropping undecodable message: {}", e);
                    }
                }
            },
        }
    }

    // ------------------------------------------------------------------------
    // Client side
    // ------------------------------------------------------------------------

    fn begin_remote_call(
        self: &Arc<Self>,
        scope_name: &str,
        func_name: &str,
        args: Vec<Value>,
        options: CallOptions,
    ) -> u64 {
        let request = {
            let mut registry = self.lock_registry();
            let call_id = registry.allocate_id();
            let request = Request::new(call_id, scope_name, func_name, args);
            registry.insert(PendingCall::new(request.clone(), options));
            request
        };
        let call_id = request.call_id;

        if self.logs(LogLevel::Debug) {
            debug!(
                channel = %self.config.name,
                call_id,
                "Call {}: {}.{}({})",
                call_id,
                scope_name,
                func_name,
                summarize_args(&request.args, self.config.log_value_limit)
            );
        }

        self.arm_timeout(call_id);
        self.transport.post_message(request.to_value());
        call_id
    }

    fn arm_timeout(self: &Arc<Self>, call_id: u64) {
        let Some(timeout) = self.config.call_timeout else {
            return;
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                if self.logs(LogLevel::Warning) {
                    warn!(
                        channel = %self.config.name,
                        call_id,
                        "No tokio runtime, call {} will wait without a timeout",
                        call_id
                    );
                }
                return;
            }
        };

        let weak = Arc::downgrade(self);
        let timer = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire_call(call_id);
            }
        });

        if !self.lock_registry().attach_timeout(call_id, timer.abort_handle()) {
            timer.abort();
        }
    }

    fn expire_call(&self, call_id: u64) {
        let Some(call) = self.lock_registry().take(call_id) else {
            return;
        };

        if self.logs(LogLevel::Warning) {
            warn!(
                channel = %self.config.name,
                call_id,
                "Call {} to {}.{} timed out",
                call_id,
                call.request.scope_name,
                call.request.func_name
            );
        }
        // The timer task is the one running this; nothing to disarm.
        self.finish_call(call, Err(Exception::timeout(call_id)));
    }

    /// Called when a response arrives for a call started on this channel.
    fn end_remote_call(&self, response: Response) {
        let call = self.lock_registry().take(response.call_id);
        let Some(mut call) = call else {
            if self.logs(LogLevel::Error) {
                error!(
                    channel = %self.config.name,
                    call_id = response.call_id,
                    "Dropping reply, unknown callId {}",
                    response.call_id
                );
            }
            return;
        };
        call.disarm();

        let result = match response.outcome {
            Outcome::Reply(reply) => Ok(reply),
            Outcome::Exception(exception) => Err(Exception::from_value(exception)),
        };
        self.finish_call(call, result);
    }

    /// Run the continuations of a call already removed from the registry.
    fn finish_call(&self, call: PendingCall, result: std::result::Result<Value, Exception>) {
        let PendingCall {
            options, request, ..
        } = call;
        let CallOptions {
            callback,
            errback,
            finback,
        } = options;

        match result {
            Ok(reply) => {
                if self.logs(LogLevel::Debug) {
                    debug!(
                        channel = %self.config.name,
                        call_id = request.call_id,
                        "Reply {}: {}.{}({})",
                        request.call_id,
                        request.scope_name,
                        request.func_name,
                        summarize(&reply, self.config.log_value_limit)
                    );
                }

                match callback {
                    Some(callback) => callback(reply),
                    None => {
                        if self.logs(LogLevel::Warning) {
                            warn!(channel = %self.config.name, call_id = request.call_id, "Ignored return value. Missing callback.");
                        }
                    }
                }
            }
            Err(exception) => {
                if self.logs(LogLevel::Warning) {
                    warn!(
                        channel = %self.config.name,
                        call_id = request.call_id,
                        "Exception calling {}.{} - {}",
                        request.scope_name,
                        request.func_name,
                        summarize(&exception.to_value(), self.config.log_value_limit)
                    );
                }

                match (errback, &self.config.default_errback) {
                    (Some(errback), _) => errback(exception),
                    (None, Some(default_errback)) => default_errback(exception),
                    (None, None) => {
                        if self.logs(LogLevel::Warning) {
                            warn!(channel = %self.config.name, call_id = request.call_id, "Ignored exception. Missing errback.");
                        }
                    }
                }
            }
        }

        if let Some(finback) = finback {
            finback();
        }
    }

    // ------------------------------------------------------------------------
    // Server side
    // ------------------------------------------------------------------------

    fn expose(&self, scope_name: String, handler: Arc<dyn AsyncScope>, kind: ScopeKind) -> Result<()> {
        if scope_name.is_empty() {
            return Err(SurrogateError::Validation {
                field: "scope_name".to_string(),
                message: "Expected a non-empty scope name".to_string(),
            });
        }

        if self.logs(LogLevel::Debug) {
            debug!(channel = %self.config.name, scope = %scope_name, kind = %kind, "Supplying scope");
        }
        self.write_scopes()
            .insert(scope_name, ExposedScope { handler, kind });
        Ok(())
    }

    /// Run an inbound request against the supplied scope.
    fn execute_call(self: &Arc<Self>, request: Request) {
        let scope = self.read_scopes().get(&request.scope_name).cloned();
        let Some(scope) = scope else {
            if self.logs(LogLevel::Error) {
                error!(
                    channel = %self.config.name,
                    call_id = request.call_id,
                    "Dropping call, no scope called {}",
                    request.scope_name
                );
            }
            return;
        };

        if self.logs(LogLevel::Debug) {
            debug!(
                channel = %self.config.name,
                call_id = request.call_id,
                kind = %scope.kind,
                "Executing {}: {}.{}({})",
                request.call_id,
                request.scope_name,
                request.func_name,
                summarize_args(&request.args, self.config.log_value_limit)
            );
        }

        let Request {
            call_id,
            scope_name,
            func_name,
            args,
        } = request;

        if !scope.handler.responds_to(&func_name) {
            self.respond(call_id, Err(Exception::not_a_function(&scope_name, &func_name)));
            return;
        }

        let handler = scope.handler;
        let mut pending: BoxFuture<'static, std::result::Result<Value, Exception>> =
            async move { handler.call(&func_name, args).await }.boxed();

        match pending.as_mut().now_or_never() {
            Some(result) => self.respond(call_id, result),
            None => deferred::respond_later(self, call_id, pending),
        }
    }

    fn respond(&self, call_id: u64, result: std::result::Result<Value, Exception>) {
        let response = match result {
            Ok(reply) => Response::reply(call_id, reply),
            Err(exception) => {
                if self.logs(LogLevel::Debug) {
                    debug!(channel = %self.config.name, call_id, "Call {} raised {}", call_id, exception);
                }
                Response::exception(call_id, &exception)
            }
        };
        self.transport.post_message(response.to_value());
    }
}
