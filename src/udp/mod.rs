//! UDP adapter shared by every gateway talking to this bridge.
//!
//! One socket, two long-lived tasks:
//! - the write loop is the only task that sends on the socket. Everything
//!   else enqueues [`Outbound`] messages through a [`WriteHandle`], which is
//!   also how a replacement socket is swapped in.
//! - the read loop receives datagrams and spawns one task per datagram that
//!   runs the protocol [`Handler`].

pub mod convert;
pub mod handlers;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::core::RouterPacket;
use crate::error::{Error, Result};

pub use handlers::{HandlerConfig, SemtechHandler};

/// Pause after a failed receive before polling the socket again.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// One datagram, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub addr: SocketAddr,
    pub data: Vec<u8>,
}

/// Encoded core packet submitted upstream, with the slot for its answer.
#[derive(Debug)]
pub struct UpstreamRequest {
    pub packet: Vec<u8>,
    pub reply: oneshot::Sender<UpstreamReply>,
}

/// Answer of the upstream component to one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamReply {
    /// Encoded router packet to transmit back through the same gateway
    Downlink(Vec<u8>),
    NoDownlink,
    Nack(String),
}

/// Protocol logic run for every inbound datagram.
///
/// Packet level failures are dealt with inside; an `Err` is only logged by
/// the read loop and never stops the adapter.
pub trait Handler: Send + Sync + 'static {
    fn handle(
        &self,
        conn: WriteHandle,
        upstream: mpsc::Sender<UpstreamRequest>,
        datagram: Datagram,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Messages drained by the write loop.
enum Outbound {
    Datagram(Datagram),
    Replace(Conn),
    Close,
}

/// Socket currently owned by the write loop. Dropping it releases the read
/// loop bound to the same socket.
struct Conn {
    socket: Arc<UdpSocket>,
    _release: oneshot::Sender<()>,
}

/// Cloneable handle to enqueue writes on the adapter socket.
#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::Sender<Outbound>,
}

impl WriteHandle {
    pub async fn send_to(&self, addr: SocketAddr, data: Vec<u8>) -> Result<()> {
        self.tx
            .send(Outbound::Datagram(Datagram { addr, data }))
            .await
            .map_err(|_| Error::operational("write queue closed"))
    }
}

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub bind: String,
    /// Largest datagram accepted, in bytes
    pub read_buffer: usize,
    /// Capacity of both the write queue and the upstream queue
    pub queue_capacity: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:1700".to_string(),
            read_buffer: 5000,
            queue_capacity: 256,
        }
    }
}

/// Semtech-facing UDP adapter.
pub struct UdpAdapter<H: Handler> {
    config: AdapterConfig,
    handler: Arc<H>,
    writer: WriteHandle,
    upstream: mpsc::Sender<UpstreamRequest>,
    local_addr: SocketAddr,
}

impl<H: Handler> UdpAdapter<H> {
    /// Bind the socket and start the read and write loops.
    ///
    /// Returns the adapter and the queue on which decoded uplinks are
    /// submitted upstream. A bind failure is returned here and nowhere else.
    pub async fn bind(
        config: AdapterConfig,
        handler: H,
    ) -> Result<(Self, mpsc::Receiver<UpstreamRequest>)> {
        let socket = UdpSocket::bind(&config.bind).await.map_err(|e| {
            error!(addr = %config.bind, error = %e, "Failed to bind UDP socket");
            Error::operational(format!("cannot bind {}: {}", config.bind, e))
        })?;
        let local_addr = socket.local_addr()?;
        info!(local_addr = %local_addr, "UDP adapter listening");

        let (write_tx, write_rx) = mpsc::channel(config.queue_capacity);
        let (upstream_tx, upstream_rx) = mpsc::channel(config.queue_capacity);

        let (conn, released) = Self::conn(socket);
        let socket = Arc::clone(&conn.socket);
        tokio::spawn(write_loop(conn, write_rx));

        let adapter = Self {
            config,
            handler: Arc::new(handler),
            writer: WriteHandle { tx: write_tx },
            upstream: upstream_tx,
            local_addr,
        };
        adapter.spawn_reader(socket, released);

        Ok((adapter, upstream_rx))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn writer(&self) -> WriteHandle {
        self.writer.clone()
    }

    /// Swap in a new socket. Queued writes go out on the new socket; the read
    /// loop of the previous one stops once the write loop lets go of it.
    pub async fn replace(&mut self, socket: UdpSocket) -> Result<()> {
        let local_addr = socket.local_addr()?;
        let (conn, released) = Self::conn(socket);
        let reader_socket = Arc::clone(&conn.socket);

        self.writer
            .tx
            .send(Outbound::Replace(conn))
            .await
            .map_err(|_| Error::operational("write queue closed"))?;
        self.spawn_reader(reader_socket, released);

        info!(old = %self.local_addr, new = %local_addr, "UDP socket replaced");
        self.local_addr = local_addr;
        Ok(())
    }

    /// Gateways are only reached in answer to their own uplinks.
    pub fn send(&self, _packet: &RouterPacket) -> Result<()> {
        Err(Error::not_supported(
            "UDP adapter cannot push a downlink without a pending uplink",
        ))
    }

    /// Close the socket. The read loop stops, queued writes after this point
    /// are dropped.
    pub async fn shutdown(self) -> Result<()> {
        self.writer
            .tx
            .send(Outbound::Close)
            .await
            .map_err(|_| Error::operational("write queue closed"))
    }

    fn conn(socket: UdpSocket) -> (Conn, oneshot::Receiver<()>) {
        let (release_tx, release_rx) = oneshot::channel();
        let conn = Conn {
            socket: Arc::new(socket),
            _release: release_tx,
        };
        (conn, release_rx)
    }

    fn spawn_reader(&self, socket: Arc<UdpSocket>, released: oneshot::Receiver<()>) {
        tokio::spawn(read_loop(
            socket,
            released,
            Arc::clone(&self.handler),
            self.writer.clone(),
            self.upstream.clone(),
            self.config.read_buffer,
        ));
    }
}

/// Dropping the adapter closes the socket as [`UdpAdapter::shutdown`] does.
impl<H: Handler> Drop for UdpAdapter<H> {
    fn drop(&mut self) {
        if let Err(TrySendError::Full(close)) = self.writer.tx.try_send(Outbound::Close) {
            let tx = self.writer.tx.clone();
            if let Ok(rt) = tokio::runtime::Handle::try_current() {
                rt.spawn(async move {
                    let _ = tx.send(close).await;
                });
            }
        }
    }
}

async fn write_loop(mut conn: Conn, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(msg) = rx.recv().await {
        match msg {
            Outbound::Datagram(Datagram { addr, data }) => {
                if let Err(e) = conn.socket.send_to(&data, addr).await {
                    warn!(addr = %addr, len = data.len(), error = %e, "UDP write failed");
                }
            }
            Outbound::Replace(next) => {
                conn = next;
            }
            Outbound::Close => break,
        }
    }
    debug!("UDP write loop stopped");
}

async fn read_loop<H: Handler>(
    socket: Arc<UdpSocket>,
    mut released: oneshot::Receiver<()>,
    handler: Arc<H>,
    writer: WriteHandle,
    upstream: mpsc::Sender<UpstreamRequest>,
    read_buffer: usize,
) {
    let mut buf = vec![0u8; read_buffer];

    loop {
        let (len, addr) = tokio::select! {
            _ = &mut released => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "UDP read failed");
                    tokio::select! {
                        _ = &mut released => break,
                        _ = tokio::time::sleep(READ_ERROR_BACKOFF) => continue,
                    }
                }
            },
        };
        debug!(addr = %addr, len, "Received datagram");

        let datagram = Datagram {
            addr,
            data: buf[..len].to_vec(),
        };
        let handler = Arc::clone(&handler);
        let writer = writer.clone();
        let upstream = upstream.clone();
        tokio::spawn(async move {
            if let Err(e) = handler.handle(writer, upstream, datagram).await {
                warn!(addr = %addr, len, error = %e, "Dropped datagram");
            }
        });
    }

    debug!(local_addr = ?socket.local_addr().ok(), "UDP read loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;
    use tokio_test::{assert_err, assert_ok};

    /// Echoes every datagram back to its sender.
    struct Echo;

    impl Handler for Echo {
        async fn handle(
            &self,
            conn: WriteHandle,
            _upstream: mpsc::Sender<UpstreamRequest>,
            datagram: Datagram,
        ) -> Result<()> {
            conn.send_to(datagram.addr, datagram.data).await
        }
    }

    fn local() -> AdapterConfig {
        AdapterConfig {
            bind: "127.0.0.1:0".to_string(),
            ..Default::default()
        }
    }

    async fn round_trip(client: &UdpSocket, to: SocketAddr, data: &[u8]) -> Vec<u8> {
        client.send_to(data, to).await.unwrap();
        let mut buf = [0u8; 64];
        let (n, from) = timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .expect("echo within a second")
            .unwrap();
        assert_eq!(from, to);
        buf[..n].to_vec()
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let config = AdapterConfig {
            bind: "not an address".to_string(),
            ..Default::default()
        };
        let err = UdpAdapter::bind(config, Echo).await.err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Operational);
    }

    #[tokio::test]
    async fn test_datagrams_are_handled() {
        let (adapter, _upstream) = UdpAdapter::bind(local(), Echo).await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        assert_eq!(round_trip(&client, adapter.local_addr(), b"ping").await, b"ping");
        assert_eq!(round_trip(&client, adapter.local_addr(), b"pong").await, b"pong");
    }

    #[tokio::test]
    async fn test_replace_swaps_socket() {
        let (mut adapter, _upstream) = UdpAdapter::bind(local(), Echo).await.unwrap();
        let old = adapter.local_addr();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let next = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        assert_ok!(adapter.replace(next).await);
        assert_ne!(adapter.local_addr(), old);

        // Replies now leave from the new socket
        assert_eq!(round_trip(&client, adapter.local_addr(), b"hi").await, b"hi");
    }

    #[tokio::test]
    async fn test_send_not_supported() {
        let (adapter, _upstream) = UdpAdapter::bind(local(), Echo).await.unwrap();
        let phy = crate::lorawan::PhyPayload::new_data(
            crate::lorawan::MType::UnconfirmedDataDown,
            1,
            1,
            1,
            vec![1],
        );
        let packet = RouterPacket::new(
            crate::lorawan::Eui64::default(),
            phy,
            crate::core::Metadata::default(),
        )
        .unwrap();

        let err = assert_err!(adapter.send(&packet));
        assert_eq!(err.kind(), crate::error::ErrorKind::NotSupported);
    }

    #[tokio::test]
    async fn test_shutdown_stops_replies() {
        let (adapter, _upstream) = UdpAdapter::bind(local(), Echo).await.unwrap();
        let addr = adapter.local_addr();
        let writer = adapter.writer();
        assert_ok!(adapter.shutdown().await);

        // The write loop is gone, so is its queue
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_err!(writer.send_to(addr, vec![1]).await);
    }

    #[tokio::test]
    async fn test_drop_closes_socket() {
        let (adapter, _upstream) = UdpAdapter::bind(local(), Echo).await.unwrap();
        let addr = adapter.local_addr();
        let writer = adapter.writer();
        drop(adapter);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_err!(writer.send_to(addr, vec![1]).await);

        // The read loop let go of the socket, so nothing answers any more
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let _ = client.send_to(b"ping", addr).await;
        let mut buf = [0u8; 8];
        assert!(timeout(Duration::from_millis(200), client.recv_from(&mut buf))
            .await
            .is_err());
    }
}
