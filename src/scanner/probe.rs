//! Single-endpoint probes
//!
//! `SynProbe` is the half-open implementation built on crafted packets.
//! `ConnectProbe` needs no privilege and stands in when raw sockets are
//! refused. The engine only sees the `NetworkProbe` trait.

use crate::config::SweepConfig;
use crate::network::packet::{PacketParser, SynPacketBuilder, TcpResponse};
use crate::network::protocol::{NetworkUtils, ResponseAnalyzer};
use crate::network::socket::{PacketTransport, TransportProvider};
use crate::network::{PortState, ScanTarget, TeardownMode};
use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Large enough for any IPv4 packet on a standard MTU link
const RECV_BUFFER_LEN: usize = 4096;

/// Capability to classify one endpoint
///
/// Implementations never fail: per-unit errors are reported as
/// `PortState::Down`.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn probe(&self, target: ScanTarget) -> PortState;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// TCP half-open probe
///
/// Sends one SYN, waits for a reply matching the probe's 4-tuple and, when
/// the port answers SYN+ACK, sends a single teardown segment before
/// returning.
pub struct SynProbe<P: TransportProvider> {
    provider: P,
    timeout: Duration,
    teardown: TeardownMode,
    source_ip: Option<Ipv4Addr>,
}

impl<P: TransportProvider> SynProbe<P> {
    pub fn new(provider: P, timeout: Duration, teardown: TeardownMode) -> Self {
        Self {
            provider,
            timeout,
            teardown,
            source_ip: None,
        }
    }

    pub fn from_config(provider: P, config: &SweepConfig) -> Self {
        Self::new(provider, config.timeout_duration(), config.teardown)
    }

    /// Pin the source address instead of asking the routing table per target
    pub fn with_source_ip(mut self, source_ip: Ipv4Addr) -> Self {
        self.source_ip = Some(source_ip);
        self
    }

    async fn run(&self, target: ScanTarget) -> crate::Result<PortState> {
        let source_ip = match self.source_ip {
            Some(ip) => ip,
            None => NetworkUtils::local_ip_for(target.ip())?,
        };
        let source_port = NetworkUtils::random_source_port();
        let transport = self.provider.open()?;

        let syn = SynPacketBuilder::new(source_ip, target.ip(), source_port, target.port()).build()?;
        transport.send(&syn, target.ip()).await?;

        let wait = self.wait_for_reply(&transport, source_ip, source_port, target);
        let (state, reply) = match timeout(self.timeout, wait).await {
            Ok(result) => result?,
            Err(_) => {
                log::debug!("{}: no response within {:?}", target, self.timeout);
                return Ok(PortState::Down);
            }
        };

        if state == PortState::Open {
            self.tear_down(&transport, source_ip, source_port, target, &reply).await;
        }

        Ok(state)
    }

    /// Receive until a segment for this probe carries SYN+ACK or RST
    async fn wait_for_reply(
        &self,
        transport: &P::Transport,
        source_ip: Ipv4Addr,
        source_port: u16,
        target: ScanTarget,
    ) -> crate::Result<(PortState, TcpResponse)> {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        loop {
            let size = transport.recv(&mut buf).await?;
            let Some(response) = PacketParser::parse_tcp_response(&buf[..size]) else {
                continue;
            };
            if !response.answers(source_ip, source_port, target.ip(), target.port()) {
                continue;
            }
            if let Some(state) = ResponseAnalyzer::classify(&response) {
                return Ok((state, response));
            }
        }
    }

    /// Reset the half-open connection the SYN+ACK created on the remote side
    async fn tear_down(
        &self,
        transport: &P::Transport,
        source_ip: Ipv4Addr,
        source_port: u16,
        target: ScanTarget,
        reply: &TcpResponse,
    ) {
        let mut builder = SynPacketBuilder::new(source_ip, target.ip(), source_port, target.port())
            .flags(self.teardown.tcp_flags())
            .sequence(reply.ack_num)
            .window(0);
        if self.teardown == TeardownMode::RstAck {
            builder = builder.acknowledgement(reply.seq_num.wrapping_add(1));
        }

        let sent = match builder.build() {
            Ok(packet) => transport.send(&packet, target.ip()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            log::warn!("{}: teardown failed: {}", target, e);
        }
    }
}

#[async_trait]
impl<P: TransportProvider> NetworkProbe for SynProbe<P> {
    async fn probe(&self, target: ScanTarget) -> PortState {
        match self.run(target).await {
            Ok(state) => {
                log::debug!("{} {}", target, state);
                state
            }
            Err(e) => {
                log::debug!("{} down: {}", target, e);
                PortState::Down
            }
        }
    }

    fn name(&self) -> &'static str {
        "syn"
    }
}

/// Full TCP connect probe, usable without raw-socket privilege
#[derive(Debug, Clone)]
pub struct ConnectProbe {
    timeout: Duration,
}

impl ConnectProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl NetworkProbe for ConnectProbe {
    async fn probe(&self, target: ScanTarget) -> PortState {
        let addr = SocketAddr::new(IpAddr::V4(target.ip()), target.port());

        let state = match timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                PortState::Open
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => PortState::Closed,
            Ok(Err(e)) => {
                log::debug!("{} connect error: {}", target, e);
                PortState::Down
            }
            Err(_) => PortState::Down,
        };

        log::debug!("{} {}", target, state);
        state
    }

    fn name(&self) -> &'static str {
        "connect"
    }
}
