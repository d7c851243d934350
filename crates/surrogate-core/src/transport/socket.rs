//! TCP transport carrying channel messages as length-prefixed JSON frames.
//!
//! A writer task drains posted messages in order. The reader task starts when
//! the channel subscribes, so no inbound frame is read before someone is
//! there to route it.

use super::{already_subscribed, MessageHandler, Transport};
use crate::config::TransportConfig;
use crate::protocol::{read_frame, write_frame};
use crate::{Result, SurrogateError};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Transport over one TCP connection.
#[derive(Debug)]
pub struct SocketTransport {
    peer_addr: SocketAddr,
    outgoing: mpsc::UnboundedSender<Value>,
    reader: Mutex<Option<OwnedReadHalf>>,
    closed_tx: Arc<watch::Sender<bool>>,
    /// The reader task waits for this before reading its first frame.
    reading_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SocketTransport {
    /// Connect to a listening peer.
    ///
    /// Uses the configured connection timeout from `TransportConfig`.
    pub async fn connect(addr: SocketAddr) -> Result<Arc<Self>> {
        let stream = tokio::time::timeout(TransportConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| SurrogateError::ConnectFailed {
                addr,
                reason: format!("timed out after {:?}", TransportConfig::CONNECT_TIMEOUT),
            })?
            .map_err(|e| SurrogateError::ConnectFailed {
                addr,
                reason: e.to_string(),
            })?;

        debug!("Socket transport connected to {}", addr);
        Self::from_stream(stream)
    }

    /// Wrap an already connected stream. Must be called inside a tokio runtime.
    pub fn from_stream(stream: TcpStream) -> Result<Arc<Self>> {
        Self::build(stream, true)
    }

    /// Like `from_stream`, but inbound frames stay unread until
    /// [`release`](Self::release), so scopes can be supplied first.
    pub(crate) fn from_stream_held(stream: TcpStream) -> Result<Arc<Self>> {
        Self::build(stream, false)
    }

    fn build(stream: TcpStream, reading: bool) -> Result<Arc<Self>> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| SurrogateError::NoRuntime {
            context: format!("socket transport needs a tokio runtime ({})", e),
        })?;

        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (reader, mut writer) = stream.into_split();
        let (outgoing, mut rx) = mpsc::unbounded_channel::<Value>();
        let (closed_tx, _) = watch::channel(false);
        let closed_tx = Arc::new(closed_tx);
        let (reading_tx, _) = watch::channel(reading);

        let writer_closed = closed_tx.clone();
        let writer_task = runtime.spawn(async move {
            while let Some(message) = rx.recv().await {
                let payload = match serde_json::to_vec(&message) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Socket transport failed to encode message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write_frame(&mut writer, &payload).await {
                    debug!("Socket transport to {} stopped writing: {}", peer_addr, e);
                    break;
                }
            }
            writer_closed.send_replace(true);
        });

        Ok(Arc::new(Self {
            peer_addr,
            outgoing,
            reader: Mutex::new(Some(reader)),
            closed_tx,
            reading_tx,
            tasks: Mutex::new(vec![writer_task]),
        }))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Start reading inbound frames on a held transport.
    pub(crate) fn release(&self) {
        self.reading_tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Wait until the connection stops carrying messages in either direction.
    pub async fn closed(&self) {
        let mut closed_rx = self.closed_tx.subscribe();
        // The sender lives in `self`, so this only errors if we are being torn down.
        let _ = closed_rx.wait_for(|closed| *closed).await;
    }

    async fn read_loop(
        mut reader: OwnedReadHalf,
        peer_addr: SocketAddr,
        handler: MessageHandler,
    ) -> Result<()> {
        while let Some(frame) = read_frame(&mut reader).await? {
            match serde_json::from_slice::<Value>(&frame) {
                Ok(message) => handler(message),
                Err(e) => warn!("Dropping malformed frame from {}: {}", peer_addr, e),
            }
        }
        Ok(())
    }
}

impl Transport for SocketTransport {
    fn post_message(&self, message: Value) {
        if self.outgoing.send(message).is_err() {
            debug!("Socket transport to {} is closed, dropping message", self.peer_addr);
        }
    }

    fn on_message(&self, handler: MessageHandler) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| SurrogateError::NoRuntime {
            context: format!("socket transport needs a tokio runtime ({})", e),
        })?;

        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| already_subscribed("Socket"))?;

        let peer_addr = self.peer_addr;
        let closed_tx = self.closed_tx.clone();
        let mut reading_rx = self.reading_tx.subscribe();
        let reader_task = runtime.spawn(async move {
            if reading_rx.wait_for(|reading| *reading).await.is_err() {
                closed_tx.send_replace(true);
                return;
            }
            match Self::read_loop(reader, peer_addr, handler).await {
                Ok(()) => debug!("Peer {} closed the connection", peer_addr),
                Err(e) => debug!("Connection to {} ended: {}", peer_addr, e),
            }
            closed_tx.send_replace(true);
        });

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reader_task);
        Ok(())
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        for task in self.tasks.lock().unwrap_or_else(PoisonError::into_inner).drain(..) {
            task.abort();
        }
    }
}
