//! Raw socket management and the transport seam used by probes

use crate::SweepError;
use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

/// Poll interval while a non-blocking receive has nothing queued
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Sends crafted IPv4 packets and receives raw inbound IPv4 packets
#[async_trait]
pub trait PacketTransport: Send + Sync {
    /// Send a complete IPv4 packet (header included) to `dest`
    async fn send(&self, packet: &[u8], dest: Ipv4Addr) -> crate::Result<usize>;

    /// Receive the next inbound IPv4 packet into `buf`
    ///
    /// May wait indefinitely; callers bound it with a timeout.
    async fn recv(&self, buf: &mut [u8]) -> crate::Result<usize>;
}

/// Hands out one transport per probe so concurrent probes never share buffers
pub trait TransportProvider: Send + Sync {
    type Transport: PacketTransport;

    fn open(&self) -> crate::Result<Self::Transport>;
}

/// Raw socket wrapper for sending crafted packets
pub struct RawSocket {
    socket: Socket,
}

impl RawSocket {
    /// Create a new raw TCP socket with IP_HDRINCL set
    pub fn new_tcp() -> crate::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::from(libc::SOCK_RAW), Some(Protocol::TCP))
            .map_err(SweepError::from_socket_error)?;

        set_header_included(&socket)?;
        socket
            .set_nonblocking(true)
            .map_err(|e| SweepError::NetworkError(e.to_string()))?;

        Ok(Self { socket })
    }

    /// Send a raw packet to the specified destination
    pub fn send_to(&self, packet: &[u8], dest: Ipv4Addr) -> crate::Result<usize> {
        let addr = SockAddr::from(SocketAddr::new(IpAddr::V4(dest), 0));
        self.socket
            .send_to(packet, &addr)
            .map_err(|e| SweepError::NetworkError(format!("send to {} failed: {}", dest, e)))
    }

    /// Non-blocking receive, `Ok(None)` when nothing is queued
    pub fn try_recv(&self, buf: &mut [u8]) -> crate::Result<Option<usize>> {
        match (&self.socket).read(buf) {
            Ok(size) => Ok(Some(size)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(SweepError::NetworkError(format!("Socket receive error: {}", e))),
        }
    }

    /// Get the raw file descriptor (Unix only)
    pub fn as_raw_fd(&self) -> i32 {
        self.socket.as_raw_fd()
    }
}

#[async_trait]
impl PacketTransport for RawSocket {
    async fn send(&self, packet: &[u8], dest: Ipv4Addr) -> crate::Result<usize> {
        self.send_to(packet, dest)
    }

    async fn recv(&self, buf: &mut [u8]) -> crate::Result<usize> {
        loop {
            if let Some(size) = self.try_recv(buf)? {
                return Ok(size);
            }
            tokio::time::sleep(RECV_POLL_INTERVAL).await;
        }
    }
}

/// Tell the kernel we supply our own IPv4 header
fn set_header_included(socket: &Socket) -> crate::Result<()> {
    socket
        .set_header_included_v4(true)
        .map_err(SweepError::from_socket_error)
}

/// Opens a fresh raw TCP socket per probe
///
/// Every raw TCP socket receives its own copy of inbound TCP traffic, so a
/// probe filtering on its 4-tuple never steals another probe's reply.
#[derive(Debug, Clone)]
pub struct RawSocketProvider {
    _priv: (),
}

impl RawSocketProvider {
    /// Verify raw-socket privilege up front
    ///
    /// Fails with `SweepError::PermissionDenied` when the process lacks root
    /// or CAP_NET_RAW, before any unit is dispatched.
    pub fn new() -> crate::Result<Self> {
        let probe_socket = RawSocket::new_tcp()?;
        log::debug!("raw socket privilege check passed (fd {})", probe_socket.as_raw_fd());
        Ok(Self { _priv: () })
    }
}

impl TransportProvider for RawSocketProvider {
    type Transport = RawSocket;

    fn open(&self) -> crate::Result<RawSocket> {
        RawSocket::new_tcp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_socket_sets_header_included() {
        match RawSocket::new_tcp() {
            Ok(raw) => assert!(raw.socket.header_included_v4().unwrap()),
            // Unprivileged runs can only check that refusal is reported as such
            Err(e) => assert!(matches!(e, SweepError::PermissionDenied(_)), "{}", e),
        }
    }

    #[test]
    fn test_provider_matches_privilege() {
        match (RawSocketProvider::new(), RawSocket::new_tcp()) {
            (Ok(provider), Ok(_)) => assert!(provider.open().is_ok()),
            (Err(e), Err(_)) => assert!(matches!(e, SweepError::PermissionDenied(_))),
            (provider, socket) => panic!(
                "privilege check disagrees with socket creation: {:?} / {:?}",
                provider.is_ok(),
                socket.is_ok()
            ),
        }
    }
}
