use pnet::packet::MutablePacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpType, IcmpTypes, checksum};
use pnet::packet::ipv4::Ipv4Packet;

/// ICMP header size (fixed)
pub const ICMP_HEADER_SIZE: usize = 8;
/// Payload carried by every echo request
pub const PAYLOAD: &[u8; 32] = b"pingpingpingpingpingpingpingping";

// ICMPv6 type codes
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;
const ICMPV6_DEST_UNREACHABLE: u8 = 1;
const ICMPV6_TIME_EXCEEDED: u8 = 3;
const IPV6_HEADER_SIZE: usize = 40;

/// Get process identifier for ICMP identification field
pub fn get_identifier() -> u16 {
    std::process::id() as u16
}

/// Build an ICMP (or ICMPv6) Echo Request carrying [`PAYLOAD`]
///
/// ICMPv6 checksums are filled in by the kernel.
pub fn build_echo_request(identifier: u16, sequence: u16, ipv6: bool) -> Vec<u8> {
    let mut buffer = vec![0u8; ICMP_HEADER_SIZE + PAYLOAD.len()];

    {
        // Buffer is sized for the header above, so the packet view always fits
        let Some(mut packet) = MutableEchoRequestPacket::new(&mut buffer) else {
            return buffer;
        };
        if ipv6 {
            packet.set_icmp_type(IcmpType::new(ICMPV6_ECHO_REQUEST));
        } else {
            packet.set_icmp_type(IcmpTypes::EchoRequest);
        }
        packet.set_icmp_code(IcmpCode::new(0));
        packet.set_identifier(identifier);
        packet.set_sequence_number(sequence);
        packet.payload_mut().copy_from_slice(PAYLOAD);
    }

    if !ipv6 && let Some(icmp) = IcmpPacket::new(&buffer) {
        let cksum = checksum(&icmp);
        buffer[2..4].copy_from_slice(&cksum.to_be_bytes());
    }

    buffer
}

/// What came back for our echo request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    EchoReply,
    DestUnreachable,
    TimeExceeded,
}

/// A received packet that answers our echo request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedReply {
    pub kind: ReplyKind,
    /// TTL from the IPv4 header, when the socket delivers one
    pub ttl: Option<u8>,
}

/// Parse a received packet and check it answers (identifier, sequence).
///
/// `has_ip_header` is true for raw IPv4 sockets. DGRAM sockets and IPv6
/// deliver the ICMP message directly. On DGRAM sockets the kernel rewrites
/// the identifier, so only the sequence is matched.
pub fn parse_reply(
    data: &[u8],
    identifier: u16,
    sequence: u16,
    ipv6: bool,
    has_ip_header: bool,
    is_dgram: bool,
) -> Option<ParsedReply> {
    let (icmp, ttl) = if has_ip_header && !ipv6 {
        let ip = Ipv4Packet::new(data)?;
        let header_len = (ip.get_header_length() as usize) * 4;
        if data.len() < header_len + ICMP_HEADER_SIZE {
            return None;
        }
        (&data[header_len..], Some(ip.get_ttl()))
    } else {
        (data, None)
    };

    if icmp.len() < ICMP_HEADER_SIZE {
        return None;
    }

    let icmp_type = icmp[0];
    let matches = |id: u16, seq: u16| seq == sequence && (is_dgram || id == identifier);

    let kind = if ipv6 {
        match icmp_type {
            ICMPV6_ECHO_REPLY => ReplyKind::EchoReply,
            ICMPV6_DEST_UNREACHABLE => ReplyKind::DestUnreachable,
            ICMPV6_TIME_EXCEEDED => ReplyKind::TimeExceeded,
            _ => return None,
        }
    } else {
        let packet = IcmpPacket::new(icmp)?;
        match packet.get_icmp_type() {
            IcmpTypes::EchoReply => ReplyKind::EchoReply,
            IcmpTypes::DestinationUnreachable => ReplyKind::DestUnreachable,
            IcmpTypes::TimeExceeded => ReplyKind::TimeExceeded,
            _ => return None,
        }
    };

    let (id, seq) = match kind {
        ReplyKind::EchoReply => echo_fields(icmp)?,
        _ => quoted_echo_fields(&icmp[ICMP_HEADER_SIZE..], ipv6)?,
    };

    matches(id, seq).then_some(ParsedReply { kind, ttl })
}

/// Identifier and sequence from an echo header
fn echo_fields(icmp: &[u8]) -> Option<(u16, u16)> {
    if icmp.len() < ICMP_HEADER_SIZE {
        return None;
    }
    let id = u16::from_be_bytes([icmp[4], icmp[5]]);
    let seq = u16::from_be_bytes([icmp[6], icmp[7]]);
    Some((id, seq))
}

/// Identifier and sequence of the echo request quoted inside an ICMP error
fn quoted_echo_fields(quoted: &[u8], ipv6: bool) -> Option<(u16, u16)> {
    let inner = if ipv6 {
        quoted.get(IPV6_HEADER_SIZE..)?
    } else {
        let ip = Ipv4Packet::new(quoted)?;
        let header_len = (ip.get_header_length() as usize) * 4;
        // Only our own echo requests are of interest
        if ip.get_next_level_protocol().0 != 1 {
            return None;
        }
        quoted.get(header_len..)?
    };
    echo_fields(inner)
}
