//! Datagram transports a live session runs over.
//!
//! The contract is deliberately narrow: send one frame, or wait a bounded time
//! for one. Framing, impairment and retransmission all live above this layer.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

/// Largest datagram a session will read.
pub const MAX_DATAGRAM: usize = 4096;

#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn send(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Wait up to `wait` for the next frame. `Ok(None)` means nothing arrived.
    async fn receive(&mut self, wait: Duration) -> io::Result<Option<Vec<u8>>>;
}

/// UDP endpoint. A client is connected to its server up front; a server
/// learns its peer from the first datagram it receives.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
}

impl UdpTransport {
    pub async fn connect(server: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;
        debug!("client socket {} connected to {server}", socket.local_addr()?);
        Ok(Self {
            socket,
            peer: Some(server),
        })
    }

    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        debug!("server socket bound to {}", socket.local_addr()?);
        Ok(Self { socket, peer: None })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl Transport for UdpTransport {
    async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let peer = self.peer.ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "peer address not known yet")
        })?;
        self.socket.send_to(frame, peer).await?;
        Ok(())
    }

    async fn receive(&mut self, wait: Duration) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, from) = match timeout(wait, self.socket.recv_from(&mut buf)).await {
            Err(_elapsed) => return Ok(None),
            Ok(result) => result?,
        };
        match self.peer {
            None => {
                debug!("learned peer {from}");
                self.peer = Some(from);
            }
            Some(peer) if peer != from => {
                debug!("ignoring datagram from stranger {from}");
                return Ok(None);
            }
            Some(_) => {}
        }
        buf.truncate(n);
        Ok(Some(buf))
    }
}

/// In-process transport; frames travel through unbounded channels and are
/// never lost or reordered by the transport itself.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Two connected in-process endpoints.
pub fn memory_pair() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport { tx: a_tx, rx: a_rx },
        MemoryTransport { tx: b_tx, rx: b_rx },
    )
}

impl Transport for MemoryTransport {
    async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.tx
            .send(frame.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer endpoint dropped"))
    }

    async fn receive(&mut self, wait: Duration) -> io::Result<Option<Vec<u8>>> {
        match timeout(wait, self.rx.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "peer endpoint dropped",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_pair_is_bidirectional() {
        let (mut a, mut b) = memory_pair();
        a.send(b"ping").await.unwrap();
        assert_eq!(
            b.receive(Duration::from_millis(10)).await.unwrap(),
            Some(b"ping".to_vec())
        );
        b.send(b"pong").await.unwrap();
        assert_eq!(
            a.receive(Duration::from_millis(10)).await.unwrap(),
            Some(b"pong".to_vec())
        );
        assert_eq!(a.receive(Duration::from_millis(5)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn server_learns_peer_from_first_datagram() {
        let mut server = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        assert!(server.send(b"too early").await.is_err());

        let mut client = UdpTransport::connect(addr).await.unwrap();
        client.send(&[0x00, 0x01, 0x02]).await.unwrap();

        let frame = server.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(frame, Some(vec![0x00, 0x01, 0x02]));
        assert!(server.peer().is_some());

        server.send(b"ack").await.unwrap();
        assert_eq!(
            client.receive(Duration::from_secs(1)).await.unwrap(),
            Some(b"ack".to_vec())
        );
    }

    #[tokio::test]
    async fn receive_times_out_quietly() {
        let mut server = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(server.receive(Duration::from_millis(5)).await.unwrap(), None);
    }
}
