//! Transport that delivers every message back to its own subscriber.
//!
//! Delivery happens on a pump task, never on the poster's stack, so a call
//! made through a loopback channel cannot re-enter the caller before
//! `post_message` returns.

use super::{already_subscribed, MessageHandler, Transport};
use crate::{Result, SurrogateError};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Loopback transport backed by an unbounded queue and a pump task.
#[derive(Debug)]
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<Value>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl LoopbackTransport {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: Mutex::new(Some(rx)),
            pump: Mutex::new(None),
        })
    }
}

impl Transport for LoopbackTransport {
    fn post_message(&self, message: Value) {
        if self.tx.send(message).is_err() {
            debug!("Loopback pump stopped, dropping message");
        }
    }

    fn on_message(&self, handler: MessageHandler) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| SurrogateError::NoRuntime {
            context: format!("loopback delivery needs a tokio runtime ({})", e),
        })?;

        let mut rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| already_subscribed("Loopback"))?;

        let pump = runtime.spawn(async move {
            while let Some(message) = rx.recv().await {
                handler(message);
            }
        });
        *self.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(pump);
        Ok(())
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take() {
            pump.abort();
        }
    }
}
