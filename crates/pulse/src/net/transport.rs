//! Client-side datagram transport.
//!
//! The socket is driven by a tokio receive task on a runtime owned by the
//! transport. Received datagrams are pushed, undecoded, into a bounded
//! channel; the owner drains that channel from its own tick loop with
//! [`Transport::try_recv`]. Sends go straight through a non-blocking std
//! handle to the same socket, so they work before the reactor has polled it.
//! A full socket buffer drops the datagram.
//!
//! A `Transport` owns a runtime, so it must not be dropped from inside
//! another async context.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::task::JoinHandle;

use super::protocol::{Envelope, MAX_PACKET_SIZE, PacketError};

pub const DEFAULT_INBOX_CAPACITY: usize = 256;

const RECV_BUFFER_SIZE: usize = MAX_PACKET_SIZE * 2;
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(5);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("failed to resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to bind socket: {0}")]
    Bind(#[source] io::Error),
    #[error("send failed: {0}")]
    Send(#[source] io::Error),
    #[error("failed to start network runtime: {0}")]
    Runtime(#[source] io::Error),
    #[error(transparent)]
    Packet(#[from] PacketError),
}

/// Resolves and validates a server address. Rejects empty hosts, port 0 and
/// unspecified addresses such as `0.0.0.0`.
pub fn resolve_server_addr(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(TransportError::InvalidAddress("empty host".to_string()));
    }
    if port == 0 {
        return Err(TransportError::InvalidAddress(format!("{}:0", host)));
    }

    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|source| TransportError::Resolve {
            addr: format!("{}:{}", host, port),
            source,
        })?
        .next()
        .ok_or_else(|| TransportError::InvalidAddress(format!("{}:{}", host, port)))?;

    if addr.ip().is_unspecified() {
        return Err(TransportError::InvalidAddress(addr.to_string()));
    }

    Ok(addr)
}

#[derive(Debug, Clone)]
pub struct Datagram {
    pub from: SocketAddr,
    pub data: Vec<u8>,
}

pub struct Transport {
    send_socket: std::net::UdpSocket,
    local_addr: SocketAddr,
    inbox: mpsc::Receiver<Datagram>,
    inbox_dropped: Arc<AtomicU64>,
    recv_task: JoinHandle<()>,
    // Owns the worker thread the receive task runs on.
    _runtime: Runtime,
}

impl Transport {
    pub fn bind<A: ToSocketAddrs>(addr: A, inbox_capacity: usize) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("pulse-net")
            .enable_all()
            .build()
            .map_err(TransportError::Runtime)?;

        let std_socket = std::net::UdpSocket::bind(addr).map_err(TransportError::Bind)?;
        std_socket.set_nonblocking(true).map_err(TransportError::Bind)?;
        let local_addr = std_socket.local_addr().map_err(TransportError::Bind)?;
        let send_socket = std_socket.try_clone().map_err(TransportError::Bind)?;

        let socket = {
            let _guard = runtime.enter();
            UdpSocket::from_std(std_socket).map_err(TransportError::Bind)?
        };

        let (sender, inbox) = mpsc::channel(inbox_capacity.max(1));
        let inbox_dropped = Arc::new(AtomicU64::new(0));

        let recv_task = runtime.spawn(receive_loop(
            socket,
            sender,
            Arc::clone(&inbox_dropped),
        ));

        log::debug!("Transport bound to {}", local_addr);

        Ok(Self {
            send_socket,
            local_addr,
            inbox,
            inbox_dropped,
            recv_task,
            _runtime: runtime,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Best-effort send. Returns `Ok(0)` when the socket buffer is full and the
    /// datagram was dropped.
    pub fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<usize, TransportError> {
        match self.send_socket.send_to(data, addr) {
            Ok(bytes) => Ok(bytes),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                log::debug!("Socket buffer full, dropping {} byte datagram", data.len());
                Ok(0)
            }
            Err(e) => Err(TransportError::Send(e)),
        }
    }

    pub fn send_envelope(
        &self,
        envelope: &Envelope,
        addr: SocketAddr,
    ) -> Result<usize, TransportError> {
        let data = envelope.serialize()?;
        self.send_to(&data, addr)
    }

    pub fn try_recv(&mut self) -> Option<Datagram> {
        match self.inbox.try_recv() {
            Ok(datagram) => Some(datagram),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                log::warn!("Receive loop has stopped");
                None
            }
        }
    }

    /// Drains everything currently queued, up to `max` datagrams.
    pub fn drain(&mut self, max: usize) -> Vec<Datagram> {
        let mut datagrams = Vec::new();
        while datagrams.len() < max {
            match self.try_recv() {
                Some(datagram) => datagrams.push(datagram),
                None => break,
            }
        }
        datagrams
    }

    /// Datagrams discarded because the inbox was full.
    pub fn inbox_dropped(&self) -> u64 {
        self.inbox_dropped.load(Ordering::Relaxed)
    }

    pub fn is_receiving(&self) -> bool {
        !self.recv_task.is_finished()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

async fn receive_loop(
    socket: UdpSocket,
    inbox: mpsc::Sender<Datagram>,
    dropped: Arc<AtomicU64>,
) {
    let mut buffer = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((size, from)) => {
                let datagram = Datagram {
                    from,
                    data: buffer[..size].to_vec(),
                };
                match inbox.try_send(datagram) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            Err(e) => {
                // ICMP unreachable and similar surface here; the socket stays usable.
                log::debug!("Receive error: {}", e);
                tokio::time::sleep(RECV_ERROR_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_rejects_invalid_targets() {
        assert!(matches!(
            resolve_server_addr("", 9999),
            Err(TransportError::InvalidAddress(_))
        ));
        assert!(matches!(
            resolve_server_addr("127.0.0.1", 0),
            Err(TransportError::InvalidAddress(_))
        ));
        assert!(matches!(
            resolve_server_addr("0.0.0.0", 9999),
            Err(TransportError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_resolve_default_target() {
        let addr = resolve_server_addr("127.0.0.1", 9999).unwrap();
        assert_eq!(addr, "127.0.0.1:9999".parse().unwrap());
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let transport = Transport::bind("127.0.0.1:0", 8).unwrap();
        assert_ne!(transport.local_addr().port(), 0);
        assert!(transport.is_receiving());
    }
}
