//! Datagram transports the engine can run over.
//!
//! [`UdpTransport`] is the real thing. Unit tests use an in-memory channel
//! pair instead, so a test can play the server byte for byte.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
#[cfg(test)]
use tokio::sync::{mpsc, Mutex};

/// A connected, unreliable datagram pipe.
///
/// `send` and `recv` may be called concurrently from different tasks. Once
/// closed both fail with [`io::ErrorKind::NotConnected`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, buf: &[u8]) -> io::Result<usize>;

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    async fn close(&self);

    fn is_closed(&self) -> bool;
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport is closed")
}

/// UDP socket connected to a single RCon server.
#[derive(Debug)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    closed: AtomicBool,
}

impl UdpTransport {
    /// Binds an ephemeral local port of the right address family and
    /// connects it to `server`.
    pub async fn connect(server: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;
        Ok(Self::from_socket(socket))
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket: Arc::new(socket),
            closed: AtomicBool::new(false),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(closed_error());
        }
        self.socket.send(buf).await
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(closed_error());
        }
        self.socket.recv(buf).await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

/// In-memory transport. Datagrams the engine sends appear on the paired
/// [`ChannelPeer`], and datagrams the peer injects are what the engine
/// receives.
#[cfg(test)]
#[derive(Debug)]
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: AtomicBool,
}

/// The far end of a [`ChannelTransport`].
#[cfg(test)]
#[derive(Debug)]
pub struct ChannelPeer {
    pub to_client: mpsc::UnboundedSender<Vec<u8>>,
    pub from_client: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[cfg(test)]
impl ChannelTransport {
    pub fn pair() -> (Self, ChannelPeer) {
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        (
            Self {
                outbound,
                inbound: Mutex::new(inbound),
                closed: AtomicBool::new(false),
            },
            ChannelPeer {
                to_client,
                from_client,
            },
        )
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(closed_error());
        }
        self.outbound
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer dropped"))?;
        Ok(buf.len())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(closed_error());
        }
        let datagram = self
            .inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "peer dropped"))?;

        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok(len)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}
