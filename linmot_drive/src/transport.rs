//! Datagram transport.
//!
//! One UDP socket per channel, bound locally and `connect()`ed to the drive
//! so the kernel drops datagrams from any other peer. The [`Transport`] trait
//! is the seam the channels are generic over.

use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use tracing::debug;

use crate::error::TransportError;

/// Smallest read timeout; `set_read_timeout(Some(ZERO))` is rejected by std.
const MIN_TIMEOUT: Duration = Duration::from_micros(1);

/// Wildcard local address of the same family as `peer`.
pub fn local_bind_addr(peer: &SocketAddr, port: u16) -> SocketAddr {
    let ip = match peer.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, port)
}

/// Datagram transport to a single peer.
pub trait Transport: Send {
    /// Send one datagram.
    fn send(&self, datagram: &[u8]) -> Result<(), TransportError>;

    /// Receive one datagram into `buf`, waiting at most `timeout`.
    ///
    /// Returns the datagram length, or [`TransportError::Timeout`].
    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    fn local_addr(&self) -> Result<SocketAddr, TransportError>;
}

/// UDP transport bound to a local address and connected to the drive.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpTransport {
    /// Bind to `local` and connect to `peer`.
    ///
    /// Port 0 in `local` picks an ephemeral port.
    pub fn connect(local: SocketAddr, peer: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(local)?;
        socket.connect(peer)?;
        debug!(local = %socket.local_addr()?, %peer, "udp transport connected");
        Ok(Self { socket, peer })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Transport for UdpTransport {
    fn send(&self, datagram: &[u8]) -> Result<(), TransportError> {
        self.socket.send(datagram)?;
        Ok(())
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.socket.set_read_timeout(Some(timeout.max(MIN_TIMEOUT)))?;
        match self.socket.recv(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Err(TransportError::Timeout)
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn send_and_receive_over_loopback() {
        let peer = UdpSocket::bind(loopback()).unwrap();
        let transport = UdpTransport::connect(loopback(), peer.local_addr().unwrap()).unwrap();

        transport.send(b"ping").unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");

        peer.send_to(b"pong", from).unwrap();
        let n = transport.receive(&mut buf, Duration::from_secs(1)).unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[test]
    fn receive_times_out() {
        let peer = UdpSocket::bind(loopback()).unwrap();
        let transport = UdpTransport::connect(loopback(), peer.local_addr().unwrap()).unwrap();

        let start = Instant::now();
        let mut buf = [0u8; 16];
        let err = transport
            .receive(&mut buf, Duration::from_millis(20))
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn zero_timeout_is_clamped() {
        let peer = UdpSocket::bind(loopback()).unwrap();
        let transport = UdpTransport::connect(loopback(), peer.local_addr().unwrap()).unwrap();
        let mut buf = [0u8; 4];
        assert!(transport.receive(&mut buf, Duration::ZERO).unwrap_err().is_timeout());
    }

    #[test]
    fn foreign_datagrams_are_filtered() {
        let peer = UdpSocket::bind(loopback()).unwrap();
        let stranger = UdpSocket::bind(loopback()).unwrap();
        let transport = UdpTransport::connect(loopback(), peer.local_addr().unwrap()).unwrap();

        stranger
            .send_to(b"noise", transport.local_addr().unwrap())
            .unwrap();
        let mut buf = [0u8; 16];
        assert!(
            transport
                .receive(&mut buf, Duration::from_millis(20))
                .unwrap_err()
                .is_timeout()
        );
    }
}
