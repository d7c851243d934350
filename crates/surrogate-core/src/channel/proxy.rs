//! Client-side handle on one remote scope.

use super::{CallOptions, Channel};
use crate::error::CallError;
use serde_json::Value;
use std::fmt;
use std::future::Future;

/// Stand-in for the scope the peer supplied under `scope_name`.
///
/// Holds nothing but the channel handle and the name; every call becomes a
/// request message on that channel.
#[derive(Clone)]
pub struct Proxy {
    channel: Channel,
    scope_name: String,
}

impl Proxy {
    pub(crate) fn new(channel: Channel, scope_name: String) -> Self {
        Self {
            channel,
            scope_name,
        }
    }

    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Call `func_name(args...)` remotely; the outcome goes to `options`.
    ///
    /// Returns the call id.
    pub fn call(&self, func_name: &str, args: Vec<Value>, options: impl Into<CallOptions>) -> u64 {
        self.channel
            .call(&self.scope_name, func_name, args, options)
    }

    /// Call `func_name(args...)` remotely and get a future of the reply.
    pub fn invoke(
        &self,
        func_name: &str,
        args: Vec<Value>,
    ) -> impl Future<Output = Result<Value, CallError>> + Send + 'static {
        self.channel.invoke(&self.scope_name, func_name, args)
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[object Proxy for '{}' on channel '{}']",
            self.scope_name,
            self.channel.name()
        )
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("scope_name", &self.scope_name)
            .field("channel", &self.channel.name())
            .finish()
    }
}

/// Declare a typed client for a remote scope.
///
/// Each method serializes its arguments, posts the request immediately and
/// returns a future of the decoded reply. `as "wire"` maps a method onto a
/// remote function with a different name.
///
/// ```rust,ignore
/// surrogate_core::remote_scope! {
///     pub struct Calculator for "math" {
///         fn add(a: f64, b: f64) -> f64;
///         fn divide as "div" (a: f64, b: f64) -> f64;
///     }
/// }
///
/// let calc = Calculator::new(&channel);
/// assert_eq!(calc.add(2.0, 3.0).await?, 5.0);
/// ```
#[macro_export]
macro_rules! remote_scope {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident for $scope:literal {
            $(
                $(#[$method_meta:meta])*
                fn $method:ident $(as $wire:literal)? ( $($arg:ident : $ty:ty),* $(,)? ) -> $ret:ty;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        $vis struct $name {
            proxy: $crate::Proxy,
        }

        impl $name {
            /// Name the remote side supplied this scope under.
            pub const SCOPE: &'static str = $scope;

            pub fn new(channel: &$crate::Channel) -> Self {
                Self {
                    proxy: channel.require($scope),
                }
            }

            pub fn proxy(&self) -> &$crate::Proxy {
                &self.proxy
            }

            $(
                $(#[$method_meta])*
                #[allow(clippy::too_many_arguments)]
                pub fn $method(
                    &self,
                    $($arg: $ty),*
                ) -> impl ::std::future::Future<Output = ::std::result::Result<$ret, $crate::CallError>>
                       + Send
                       + 'static {
                    let args = (|| -> ::std::result::Result<
                        ::std::vec::Vec<$crate::__private::Value>,
                        $crate::CallError,
                    > {
                        Ok(vec![$($crate::__private::to_arg(&$arg)?),*])
                    })();
                    $crate::__private::invoke_typed::<$ret>(
                        &self.proxy,
                        $crate::__remote_name!($method $(, $wire)?),
                        args,
                    )
                }
            )*
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __remote_name {
    ($method:ident) => {
        stringify!($method)
    };
    ($method:ident, $wire:literal) => {
        $wire
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Methods;
    use crate::config::ChannelConfig;
    use crate::transport::create_pipe;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_display_never_calls_remote() {
        let pipe = create_pipe();
        let channel = Channel::new(pipe.left.clone(), ChannelConfig::new("content")).unwrap();
        let proxy = channel.require("inspector");

        assert_eq!(
            proxy.to_string(),
            "[object Proxy for 'inspector' on channel 'content']"
        );
        let _ = format!("{:?}", proxy);
        assert!(channel.pending_calls().is_empty());
    }

    #[test]
    fn test_proxy_call_reaches_scope() {
        let pipe = create_pipe();
        let client = Channel::new(pipe.left.clone(), ChannelConfig::new("client")).unwrap();
        let server = Channel::new(pipe.right.clone(), ChannelConfig::new("server")).unwrap();
        server
            .supply(
                "echo",
                Methods::new().with("echo", |args| Ok(Value::Array(args))),
            )
            .unwrap();

        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        let proxy = client.require("echo");
        let call_id = proxy.call("echo", vec![json!({"a": [1, 2]}), json!("b")], move |reply: Value| {
            *slot.lock().unwrap() = Some(reply);
        });

        assert_eq!(call_id, 1);
        assert_eq!(
            seen.lock().unwrap().take(),
            Some(json!([{"a": [1, 2]}, "b"]))
        );
    }
}
