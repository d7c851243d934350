//! In-process pipe simulating two isolated contexts.
//!
//! Each side serializes what it posts to JSON text and parses it back before
//! handing it to the other side, so no value crossing the pipe shares memory
//! with what the sender still holds. Delivery is synchronous.

use super::{already_subscribed, MessageHandler, Transport};
use crate::Result;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, warn};

type Slot = Arc<Mutex<Option<MessageHandler>>>;

/// One side of a [`Pipe`].
pub struct Endpoint {
    label: &'static str,
    inbound: Slot,
    outbound: Slot,
}

/// Two endpoints wired to each other.
pub struct Pipe {
    pub left: Arc<Endpoint>,
    pub right: Arc<Endpoint>,
}

/// Create a pipe whose `left` delivers to `right` and vice versa.
pub fn create_pipe() -> Pipe {
    let left_slot: Slot = Arc::new(Mutex::new(None));
    let right_slot: Slot = Arc::new(Mutex::new(None));

    Pipe {
        left: Arc::new(Endpoint {
            label: "left",
            inbound: left_slot.clone(),
            outbound: right_slot.clone(),
        }),
        right: Arc::new(Endpoint {
            label: "right",
            inbound: right_slot,
            outbound: left_slot,
        }),
    }
}

impl Endpoint {
    pub fn label(&self) -> &'static str {
        self.label
    }

    fn deep_clone(message: &Value) -> serde_json::Result<Value> {
        let text = serde_json::to_string(message)?;
        serde_json::from_str(&text)
    }
}

impl Transport for Endpoint {
    fn post_message(&self, message: Value) {
        let clone = match Self::deep_clone(&message) {
            Ok(clone) => clone,
            Err(e) => {
                error!("Pipe {} failed to clone message: {}", self.label, e);
                return;
            }
        };

        // Release the slot before delivering; the peer may post back.
        let handler = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match handler {
            Some(handler) => handler(clone),
            None => warn!("Pipe {} has no listener on the other side, dropping message", self.label),
        }
    }

    fn on_message(&self, handler: MessageHandler) -> Result<()> {
        let mut slot = self.inbound.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(already_subscribed("Pipe"));
        }
        *slot = Some(handler);
        Ok(())
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscribed = self
            .inbound
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false);
        f.debug_struct("Endpoint")
            .field("label", &self.label)
            .field("subscribed", &subscribed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collector() -> (MessageHandler, Arc<Mutex<Vec<Value>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Arc::new(move |message| sink.lock().unwrap().push(message)), seen)
    }

    #[test]
    fn test_left_delivers_to_right_and_back() {
        let pipe = create_pipe();
        let (left_handler, left_seen) = collector();
        let (right_handler, right_seen) = collector();
        pipe.left.on_message(left_handler).unwrap();
        pipe.right.on_message(right_handler).unwrap();

        pipe.left.post_message(json!({"to": "right"}));
        pipe.right.post_message(json!({"to": "left"}));

        assert_eq!(*right_seen.lock().unwrap(), vec![json!({"to": "right"})]);
        assert_eq!(*left_seen.lock().unwrap(), vec![json!({"to": "left"})]);
    }

    #[test]
    fn test_delivery_is_synchronous_and_ordered() {
        let pipe = create_pipe();
        let (handler, seen) = collector();
        pipe.right.on_message(handler).unwrap();

        for i in 0..5 {
            pipe.left.post_message(json!(i));
            assert_eq!(seen.lock().unwrap().len(), i + 1);
        }
        assert_eq!(
            *seen.lock().unwrap(),
            (0..5).map(|i| json!(i)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_post_without_listener_is_dropped() {
        let pipe = create_pipe();
        pipe.left.post_message(json!("nobody home"));
        let (handler, seen) = collector();
        pipe.right.on_message(handler).unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_handler_may_post_back_during_delivery() {
        let pipe = create_pipe();
        let (left_handler, left_seen) = collector();
        pipe.left.on_message(left_handler).unwrap();

        let right = pipe.right.clone();
        pipe.right
            .on_message(Arc::new(move |message| {
                right.post_message(json!({"echo": message}));
            }))
            .unwrap();

        pipe.left.post_message(json!(7));
        assert_eq!(*left_seen.lock().unwrap(), vec![json!({"echo": 7})]);
    }

    #[test]
    fn test_second_subscription_is_rejected() {
        let pipe = create_pipe();
        pipe.left.on_message(Arc::new(|_| {})).unwrap();
        assert!(pipe.left.on_message(Arc::new(|_| {})).is_err());
    }
}
