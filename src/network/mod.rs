//! Network module for packet crafting, raw transports and probe classification

pub mod packet;
pub mod protocol;
pub mod socket;

use crate::SweepError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// One endpoint to probe
///
/// Ordering is numeric on the address octets, then on the port, which is the
/// ordering used by the final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTarget")]
pub struct ScanTarget {
    ip: Ipv4Addr,
    port: u16,
}

/// Wire shape of a target, checked by `ScanTarget::new` on the way in
#[derive(Deserialize)]
struct RawTarget {
    ip: Ipv4Addr,
    port: u16,
}

impl TryFrom<RawTarget> for ScanTarget {
    type Error = SweepError;

    fn try_from(raw: RawTarget) -> Result<Self, Self::Error> {
        ScanTarget::new(raw.ip, raw.port)
    }
}

impl ScanTarget {
    /// Create a target, rejecting port 0
    pub fn new(ip: Ipv4Addr, port: u16) -> crate::Result<Self> {
        if port == 0 {
            return Err(SweepError::InvalidTarget(format!(
                "{}: port must be in 1-65535",
                ip
            )));
        }
        Ok(Self { ip, port })
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Key used to join against external metadata tables
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl FromStr for ScanTarget {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| SweepError::InvalidTarget(format!("expected ip:port, got {}", s)))?;
        let ip: Ipv4Addr = ip.parse()?;
        let port: u16 = port.parse()?;
        Self::new(ip, port)
    }
}

/// Classification of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    /// SYN+ACK received
    Open,
    /// RST or RST+ACK received
    Closed,
    /// No matching response before the timeout, or a per-unit socket error
    Down,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortState::Open => write!(f, "open"),
            PortState::Closed => write!(f, "closed"),
            PortState::Down => write!(f, "down"),
        }
    }
}

/// Flags used when tearing down a half-open connection after a SYN+ACK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TeardownMode {
    /// Plain RST
    Rst,
    /// RST+ACK
    #[default]
    RstAck,
}

impl TeardownMode {
    /// TCP flag byte for the teardown segment
    pub fn tcp_flags(&self) -> u8 {
        match self {
            TeardownMode::Rst => packet::flags::RST,
            TeardownMode::RstAck => packet::flags::RST | packet::flags::ACK,
        }
    }
}

impl FromStr for TeardownMode {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rst" => Ok(TeardownMode::Rst),
            "rst-ack" | "rstack" | "ack-rst" => Ok(TeardownMode::RstAck),
            other => Err(SweepError::ConfigError(format!(
                "unknown teardown mode '{}', expected rst or rst-ack",
                other
            ))),
        }
    }
}
