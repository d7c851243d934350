//! Message transports a channel can be bound to.
//!
//! A transport moves JSON messages to "the other side" and hands inbound
//! messages to exactly one subscriber, the channel's router.
//!
//! - **Loopback**: delivers back to the same channel, asynchronously
//! - **Pipe**: two in-process endpoints wired to each other, clone-on-send
//! - **Socket**: length-prefixed JSON frames over TCP

pub mod loopback;
pub mod pipe;
pub mod socket;

pub use loopback::LoopbackTransport;
pub use pipe::{create_pipe, Endpoint, Pipe};
pub use socket::SocketTransport;

use crate::Result;
use serde_json::Value;
use std::sync::Arc;

/// Callback receiving every inbound message of a transport.
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Anything that can carry channel messages.
///
/// Equivalent of a `{postMessage(message), on('message', handler)}` handle.
pub trait Transport: Send + Sync + 'static {
    /// Send a message to the other side. Never blocks on the peer.
    fn post_message(&self, message: Value);

    /// Install the handler for inbound messages.
    ///
    /// A transport accepts a single subscription; a second call is an error.
    fn on_message(&self, handler: MessageHandler) -> Result<()>;
}

pub(crate) fn already_subscribed(transport: &str) -> crate::SurrogateError {
    crate::SurrogateError::Validation {
        field: "on_message".to_string(),
        message: format!("{} transport already has a message handler", transport),
    }
}
