//! TCP server handing each accepted connection its own channel.
//!
//! # Thread Safety
//!
//! The server runs on the tokio runtime. Each connection is served in its own
//! spawned task, which owns that connection's `Channel` until the peer goes
//! away or the server shuts down.

use crate::channel::Channel;
use crate::config::{ChannelConfig, TransportConfig};
use crate::transport::SocketTransport;
use crate::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

/// Handle to a running channel server. Dropping shuts down the server.
pub struct ChannelServerHandle {
    addr: SocketAddr,
    capacity: usize,
    slots: Arc<Semaphore>,
    stop_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ChannelServerHandle {
    /// Address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Stop accepting connections and close every served channel.
    pub fn shutdown(&mut self) {
        self.stop_tx.send_replace(true);
    }
}

impl Drop for ChannelServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

type Setup = dyn Fn(&Channel) -> Result<()> + Send + Sync;

/// Accepts connections and builds one channel per connection.
pub struct ChannelServer;

impl ChannelServer {
    /// Bind `addr` and start serving.
    ///
    /// `setup` runs once per accepted connection, before any of its messages
    /// are read, and typically supplies the scopes the peer may require. Each
    /// channel gets a copy of `config` named `"<name>:<peer address>"`. At most
    /// [`TransportConfig::MAX_CONNECTIONS`] peers are served at once; further
    /// connections are closed on accept.
    pub async fn start<A, F>(addr: A, config: ChannelConfig, setup: F) -> Result<ChannelServerHandle>
    where
        A: ToSocketAddrs,
        F: Fn(&Channel) -> Result<()> + Send + Sync + 'static,
    {
        Self::start_with_capacity(addr, config, setup, TransportConfig::MAX_CONNECTIONS).await
    }

    async fn start_with_capacity<A, F>(
        addr: A,
        config: ChannelConfig,
        setup: F,
        capacity: usize,
    ) -> Result<ChannelServerHandle>
    where
        A: ToSocketAddrs,
        F: Fn(&Channel) -> Result<()> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        info!("Channel server listening on {} ({} slots)", addr, capacity);

        let (stop_tx, stop_rx) = watch::channel(false);
        let slots = Arc::new(Semaphore::new(capacity));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            Arc::new(config),
            Arc::new(setup),
            slots.clone(),
            stop_rx,
        ));

        Ok(ChannelServerHandle {
            addr,
            capacity,
            slots,
            stop_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        config: Arc<ChannelConfig>,
        setup: Arc<Setup>,
        slots: Arc<Semaphore>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = stop_rx.wait_for(|stop| *stop) => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Accept error: {}", e);
                        continue;
                    }
                },
            };

            let Ok(permit) = slots.clone().try_acquire_owned() else {
                warn!("Rejecting connection from {}: no free slot", peer_addr);
                continue;
            };

            let config = config.clone();
            let setup = setup.clone();
            let stop_rx = stop_rx.clone();
            tokio::spawn(async move {
                debug!("Connection from {}", peer_addr);
                if let Err(e) =
                    Self::serve_connection(stream, peer_addr, &config, &*setup, stop_rx, permit).await
                {
                    warn!("Connection {} ended: {}", peer_addr, e);
                }
            });
        }
        info!("Channel server shutting down");
    }

    async fn serve_connection(
        stream: TcpStream,
        peer_addr: SocketAddr,
        config: &ChannelConfig,
        setup: &Setup,
        mut stop_rx: watch::Receiver<bool>,
        _slot: OwnedSemaphorePermit,
    ) -> Result<()> {
        let transport = SocketTransport::from_stream_held(stream)?;
        let channel = Channel::new(
            transport.clone(),
            ChannelConfig {
                name: format!("{}:{}", config.name, peer_addr),
                ..config.clone()
            },
        )?;
        setup(&channel)?;
        transport.release();

        tokio::select! {
            _ = transport.closed() => {
                debug!("Channel {} closed by peer", channel.name());
            }
            _ = stop_rx.wait_for(|stop| *stop) => {
                debug!("Channel {} closed by server shutdown", channel.name());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Methods;
    use crate::SurrogateError;
    use serde_json::{json, Value};
    use std::time::Duration;

    async fn echo_server() -> ChannelServerHandle {
        ChannelServer::start("127.0.0.1:0", ChannelConfig::new("server"), |channel| {
            channel.supply(
                "echo",
                Methods::new().with("echo", |args| Ok(Value::Array(args))),
            )
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_server_start_and_shutdown() {
        let mut handle = echo_server().await;

        assert!(handle.port() > 0);
        assert_eq!(handle.addr().ip(), std::net::Ipv4Addr::LOCALHOST);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_each_connection_gets_a_channel() {
        let mut handle = echo_server().await;

        for round in 0..2 {
            let transport = SocketTransport::connect(handle.addr()).await.unwrap();
            let client = Channel::new(transport, ChannelConfig::new("client")).unwrap();
            let reply = client
                .invoke("echo", "echo", vec![json!(round), json!("x")])
                .await
                .unwrap();
            assert_eq!(reply, json!([round, "x"]));
        }

        handle.shutdown();
    }

    async fn wait_for_active(handle: &ChannelServerHandle, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.active_connections() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_slot_released_when_peer_leaves() {
        let mut handle = echo_server().await;
        assert_eq!(handle.active_connections(), 0);

        let transport = SocketTransport::connect(handle.addr()).await.unwrap();
        let client = Channel::new(transport, ChannelConfig::new("client")).unwrap();
        client.invoke("echo", "echo", vec![json!(1)]).await.unwrap();
        assert_eq!(handle.active_connections(), 1);

        drop(client);
        wait_for_active(&handle, 0).await;

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_connection_beyond_capacity_is_closed() {
        let mut handle = ChannelServer::start_with_capacity(
            "127.0.0.1:0",
            ChannelConfig::new("server"),
            |channel: &Channel| {
                channel.supply(
                    "echo",
                    Methods::new().with("echo", |args| Ok(Value::Array(args))),
                )
            },
            1,
        )
        .await
        .unwrap();

        let first = SocketTransport::connect(handle.addr()).await.unwrap();
        let first = Channel::new(first, ChannelConfig::new("first")).unwrap();
        first.invoke("echo", "echo", vec![json!("a")]).await.unwrap();

        let second = SocketTransport::connect(handle.addr()).await.unwrap();
        let _second_channel = Channel::new(second.clone(), ChannelConfig::new("second")).unwrap();
        tokio::time::timeout(Duration::from_secs(5), second.closed())
            .await
            .unwrap();
        assert_eq!(handle.active_connections(), 1);

        // The original peer keeps being served.
        let reply = first.invoke("echo", "echo", vec![json!("b")]).await.unwrap();
        assert_eq!(reply, json!(["b"]));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_failed_setup_closes_connection() {
        let mut handle = ChannelServer::start("127.0.0.1:0", ChannelConfig::default(), |_| {
            Err(SurrogateError::Validation {
                field: "setup".to_string(),
                message: "refused".to_string(),
            })
        })
        .await
        .unwrap();

        let transport = SocketTransport::connect(handle.addr()).await.unwrap();
        let _client = Channel::new(transport.clone(), ChannelConfig::new("client")).unwrap();
        tokio::time::timeout(Duration::from_secs(5), transport.closed())
            .await
            .unwrap();

        handle.shutdown();
    }
}
