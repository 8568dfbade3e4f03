//! Packet crafting and parsing for SYN probes
//!
//! Headers are laid out through pnet's mutable packet views. Both checksums
//! are computed here with the RFC 1071 one's-complement sum rather than
//! pnet's helpers, so the same routine can validate finished packets.

use crate::SweepError;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{Ipv4Flags, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::tcp::{MutableTcpPacket, TcpPacket};
use pnet::packet::Packet;
use rand::Rng;
use std::net::Ipv4Addr;

/// TCP flag bits
pub mod flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
}

pub const IPV4_HEADER_LEN: usize = 20;
pub const TCP_HEADER_LEN: usize = 20;
pub const SYN_PACKET_LEN: usize = IPV4_HEADER_LEN + TCP_HEADER_LEN;
pub const DEFAULT_TTL: u8 = 64;
pub const DEFAULT_WINDOW: u16 = 64240;

const IPPROTO_TCP: u8 = 6;

/// Folded one's-complement sum of big-endian 16-bit words
///
/// An odd trailing byte is treated as the high byte of a zero-padded word.
pub fn ones_complement_sum(data: &[u8]) -> u16 {
    let mut sum: u64 = 0;
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u16::from_be_bytes([word[0], word[1]]) as u64;
    }
    if let [last] = words.remainder() {
        sum += (*last as u64) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// RFC 1071 Internet checksum
pub fn checksum(data: &[u8]) -> u16 {
    !ones_complement_sum(data)
}

/// Pseudo-header prefix used by the TCP checksum
fn pseudo_header(source: Ipv4Addr, dest: Ipv4Addr, tcp_len: u16) -> [u8; 12] {
    let mut header = [0u8; 12];
    header[0..4].copy_from_slice(&source.octets());
    header[4..8].copy_from_slice(&dest.octets());
    header[8] = 0;
    header[9] = IPPROTO_TCP;
    header[10..12].copy_from_slice(&tcp_len.to_be_bytes());
    header
}

/// TCP checksum over pseudo-header + segment
///
/// The segment's checksum field must be zero when computing, or hold the
/// transmitted value when validating (the sum is then `0xFFFF`).
pub fn tcp_checksum(source: Ipv4Addr, dest: Ipv4Addr, segment: &[u8]) -> u16 {
    let mut buf = Vec::with_capacity(12 + segment.len());
    buf.extend_from_slice(&pseudo_header(source, dest, segment.len() as u16));
    buf.extend_from_slice(segment);
    checksum(&buf)
}

/// Sum of pseudo-header + segment, `0xFFFF` for a segment with a valid checksum
pub fn tcp_validation_sum(source: Ipv4Addr, dest: Ipv4Addr, segment: &[u8]) -> u16 {
    let mut buf = Vec::with_capacity(12 + segment.len());
    buf.extend_from_slice(&pseudo_header(source, dest, segment.len() as u16));
    buf.extend_from_slice(segment);
    ones_complement_sum(&buf)
}

/// Builder for the 40-byte IPv4 + TCP segments a probe sends
///
/// Defaults to a SYN with a random ISN and IP identification. The same builder
/// produces the RST / RST+ACK teardown segment by overriding the flags.
#[derive(Debug, Clone)]
pub struct SynPacketBuilder {
    source_ip: Ipv4Addr,
    dest_ip: Ipv4Addr,
    source_port: u16,
    dest_port: u16,
    flags: u8,
    seq_num: u32,
    ack_num: u32,
    window_size: u16,
    ip_id: u16,
    ttl: u8,
}

impl SynPacketBuilder {
    pub fn new(source_ip: Ipv4Addr, dest_ip: Ipv4Addr, source_port: u16, dest_port: u16) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            source_ip,
            dest_ip,
            source_port,
            dest_port,
            flags: flags::SYN,
            seq_num: rng.gen(),
            ack_num: 0,
            window_size: DEFAULT_WINDOW,
            ip_id: rng.gen(),
            ttl: DEFAULT_TTL,
        }
    }

    /// Replace the TCP flags
    pub fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn sequence(mut self, seq_num: u32) -> Self {
        self.seq_num = seq_num;
        self
    }

    pub fn acknowledgement(mut self, ack_num: u32) -> Self {
        self.ack_num = ack_num;
        self
    }

    pub fn window(mut self, window_size: u16) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn identification(mut self, ip_id: u16) -> Self {
        self.ip_id = ip_id;
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn seq_num(&self) -> u32 {
        self.seq_num
    }

    /// Build the complete IP + TCP packet
    pub fn build(&self) -> crate::Result<Vec<u8>> {
        let mut packet_buf = vec![0u8; SYN_PACKET_LEN];

        // TCP header first: its checksum only depends on the pseudo-header
        {
            let mut tcp_packet = MutableTcpPacket::new(&mut packet_buf[IPV4_HEADER_LEN..])
                .ok_or_else(|| SweepError::NetworkError("TCP buffer too small".to_string()))?;
            tcp_packet.set_source(self.source_port);
            tcp_packet.set_destination(self.dest_port);
            tcp_packet.set_sequence(self.seq_num);
            tcp_packet.set_acknowledgement(self.ack_num);
            tcp_packet.set_data_offset(5); // 5 * 4 = 20 bytes
            tcp_packet.set_reserved(0);
            tcp_packet.set_flags(self.flags as u16);
            tcp_packet.set_window(self.window_size);
            tcp_packet.set_urgent_ptr(0);
            tcp_packet.set_checksum(0);

            let sum = tcp_checksum(self.source_ip, self.dest_ip, tcp_packet.packet());
            tcp_packet.set_checksum(sum);
        }

        {
            let mut ip_packet = MutableIpv4Packet::new(&mut packet_buf[..IPV4_HEADER_LEN])
                .ok_or_else(|| SweepError::NetworkError("IPv4 buffer too small".to_string()))?;
            ip_packet.set_version(4);
            ip_packet.set_header_length(5); // 5 * 4 = 20 bytes
            ip_packet.set_dscp(0);
            ip_packet.set_ecn(0);
            ip_packet.set_total_length(SYN_PACKET_LEN as u16);
            ip_packet.set_identification(self.ip_id);
            ip_packet.set_flags(Ipv4Flags::DontFragment);
            ip_packet.set_fragment_offset(0);
            ip_packet.set_ttl(self.ttl);
            ip_packet.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
            ip_packet.set_source(self.source_ip);
            ip_packet.set_destination(self.dest_ip);
            ip_packet.set_checksum(0);

            let sum = checksum(ip_packet.packet());
            ip_packet.set_checksum(sum);
        }

        Ok(packet_buf)
    }
}

/// Packet parser for analyzing received packets
pub struct PacketParser;

impl PacketParser {
    /// Parse an IPv4 + TCP packet, `None` for anything else
    pub fn parse_tcp_response(packet: &[u8]) -> Option<TcpResponse> {
        if packet.len() < IPV4_HEADER_LEN + TCP_HEADER_LEN {
            return None;
        }

        let ip_packet = Ipv4Packet::new(packet)?;
        if ip_packet.get_version() != 4
            || ip_packet.get_next_level_protocol() != IpNextHeaderProtocols::Tcp
        {
            return None;
        }

        let ip_header_len = (ip_packet.get_header_length() as usize) * 4;
        if ip_header_len < IPV4_HEADER_LEN || packet.len() < ip_header_len + TCP_HEADER_LEN {
            return None;
        }
        let tcp_packet = TcpPacket::new(&packet[ip_header_len..])?;

        Some(TcpResponse {
            source_ip: ip_packet.get_source(),
            dest_ip: ip_packet.get_destination(),
            source_port: tcp_packet.get_source(),
            dest_port: tcp_packet.get_destination(),
            flags: tcp_packet.get_flags() as u8,
            seq_num: tcp_packet.get_sequence(),
            ack_num: tcp_packet.get_acknowledgement(),
        })
    }
}

/// TCP response structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpResponse {
    pub source_ip: Ipv4Addr,
    pub dest_ip: Ipv4Addr,
    pub source_port: u16,
    pub dest_port: u16,
    pub flags: u8,
    pub seq_num: u32,
    pub ack_num: u32,
}

impl TcpResponse {
    pub fn is_syn_ack(&self) -> bool {
        (self.flags & (flags::SYN | flags::ACK)) == (flags::SYN | flags::ACK)
    }

    pub fn is_rst(&self) -> bool {
        (self.flags & flags::RST) != 0
    }

    /// True when this segment answers a probe sent from `local` to `remote`
    pub fn answers(
        &self,
        local_ip: Ipv4Addr,
        local_port: u16,
        remote_ip: Ipv4Addr,
        remote_port: u16,
    ) -> bool {
        self.source_ip == remote_ip
            && self.source_port == remote_port
            && self.dest_ip == local_ip
            && self.dest_port == local_port
    }
}
