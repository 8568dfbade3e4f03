//! Response classification and small network helpers

use crate::network::packet::TcpResponse;
use crate::network::PortState;
use crate::SweepError;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

/// Lowest source port handed to probes
pub const EPHEMERAL_PORT_MIN: u16 = 32768;

/// Maps a matching TCP reply onto a port state
pub struct ResponseAnalyzer;

impl ResponseAnalyzer {
    /// Classify a reply that already matched the probe's 4-tuple
    ///
    /// `None` means the segment says nothing about the port (for example a
    /// bare ACK) and the prober should keep waiting.
    pub fn classify(response: &TcpResponse) -> Option<PortState> {
        if response.is_rst() {
            Some(PortState::Closed)
        } else if response.is_syn_ack() {
            Some(PortState::Open)
        } else {
            None
        }
    }
}

/// Network utilities
pub struct NetworkUtils;

impl NetworkUtils {
    /// Local IPv4 address the kernel would route `target` through
    ///
    /// Connecting a UDP socket sends nothing but fixes the source address.
    pub fn local_ip_for(target: Ipv4Addr) -> crate::Result<Ipv4Addr> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| SweepError::NetworkError(e.to_string()))?;
        socket
            .connect(SocketAddr::new(IpAddr::V4(target), 9))
            .map_err(|e| SweepError::NetworkError(format!("no route to {}: {}", target, e)))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| SweepError::NetworkError(e.to_string()))?;

        match local_addr.ip() {
            IpAddr::V4(ipv4) => Ok(ipv4),
            IpAddr::V6(_) => Err(SweepError::InvalidTarget("IPv6 not supported".to_string())),
        }
    }

    /// Generate a random ephemeral source port
    pub fn random_source_port() -> u16 {
        use rand::Rng;
        rand::thread_rng().gen_range(EPHEMERAL_PORT_MIN..=u16::MAX)
    }
}
