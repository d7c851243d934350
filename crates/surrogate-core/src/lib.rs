//! Surrogate Core - remote procedure calls between isolated contexts.
//!
//! A [`Channel`] sits on one side of a message-only [`Transport`]. It can
//! supply scopes (named bags of functions) to the other side and require the
//! scopes the other side supplied. Calls are asynchronous: a request goes out
//! tagged with a call id, and the matching response later runs the caller's
//! continuation.
//!
//! Transports shipped here:
//!
//! - [`create_pipe`]: in-process pair of endpoints, synchronous delivery with
//!   clone-on-send. Used mostly for tests.
//! - [`LoopbackTransport`]: a channel talking to itself.
//! - [`SocketTransport`]: length-prefixed JSON frames over TCP, with
//!   [`ChannelServer`] building one channel per accepted connection.
//!
//! # Example
//!
//! ```rust,ignore
//! use surrogate_core::{arg, create_pipe, Channel, ChannelConfig, Methods};
//! use serde_json::{json, Value};
//!
//! let pipe = create_pipe();
//! let page = Channel::new(pipe.left.clone(), ChannelConfig::new("page"))?;
//! let panel = Channel::new(pipe.right.clone(), ChannelConfig::new("panel"))?;
//!
//! page.supply(
//!     "math",
//!     Methods::new().with("add", |args| {
//!         let (a, b): (f64, f64) = (arg(&args, 0)?, arg(&args, 1)?);
//!         Ok(json!(a + b))
//!     }),
//! )?;
//!
//! panel
//!     .require("math")
//!     .call("add", vec![json!(2), json!(3)], |sum: Value| println!("{}", sum));
//! ```

pub mod channel;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod exception;
pub mod protocol;
pub mod server;
pub mod transport;

pub use channel::{
    arg, AsyncMethods, AsyncScope, CallOptions, CallResult, Channel, Completion, LacoMethods,
    LacoScope, Methods, Proxy, ScopeKind, SyncScope,
};
pub use config::{ChannelConfig, TransportConfig};
pub use diagnostics::LogLevel;
pub use error::{CallError, Result, SurrogateError};
pub use exception::Exception;
pub use server::{ChannelServer, ChannelServerHandle};
pub use transport::{create_pipe, Endpoint, LoopbackTransport, Pipe, SocketTransport, Transport};

/// Support for `remote_scope!` expansions. Not public API.
#[doc(hidden)]
pub mod __private {
    use crate::{CallError, Proxy};
    use serde::de::DeserializeOwned;
    use serde::Serialize;
    use std::future::Future;

    pub use serde_json::Value;

    pub fn to_arg<T: Serialize + ?Sized>(value: &T) -> Result<Value, CallError> {
        serde_json::to_value(value).map_err(CallError::Encode)
    }

    pub fn from_reply<R: DeserializeOwned>(reply: Value) -> Result<R, CallError> {
        serde_json::from_value(reply).map_err(CallError::Decode)
    }

    /// Post the call now (if the arguments encoded) and decode the reply later.
    pub fn invoke_typed<R: DeserializeOwned + 'static>(
        proxy: &Proxy,
        func_name: &str,
        args: Result<Vec<Value>, CallError>,
    ) -> impl Future<Output = Result<R, CallError>> + Send + 'static {
        let pending = args.map(|args| proxy.invoke(func_name, args));
        async move {
            let reply = pending?.await?;
            from_reply(reply)
        }
    }
}
