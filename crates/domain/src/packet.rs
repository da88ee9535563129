//! IP packet slicing for the hot path.
//!
//! Packets arrive from the queue without a link layer; parsing starts at
//! the IP header. Anything that is not IPv4 or IPv6 is a parse failure
//! and the caller accepts the packet untouched.

use etherparse::{InternetSlice, SlicedPacket, TransportSlice};
use thiserror::Error;

use crate::common::entity::{AddressFamily, Protocol, Tuple};
use crate::event::TcpInfo;

#[derive(Debug, Error)]
pub enum PacketParseError {
    #[error("packet has no IPv4 or IPv6 layer")]
    NotIp,

    #[error("malformed packet: {0}")]
    Malformed(String),
}

/// The slices of one packet the dispatcher cares about.
#[derive(Debug, Clone)]
pub struct ParsedPacket {
    pub tuple: Tuple,
    pub family: AddressFamily,
    pub tcp: Option<TcpInfo>,
    pub payload: Vec<u8>,
}

/// Slice an IP packet into the tuple, TCP flags, and application payload.
///
/// Ports stay zero for transports without them (ICMP and friends); the
/// tuple still identifies the flow well enough for logging and reuse
/// comparison, which is all the dispatcher needs.
pub fn parse_ip_packet(data: &[u8]) -> Result<ParsedPacket, PacketParseError> {
    let sliced = SlicedPacket::from_ip(data)
        .map_err(|err| PacketParseError::Malformed(err.to_string()))?;

    let (family, protocol, client_address, server_address) = match &sliced.ip {
        Some(InternetSlice::Ipv4(header, _ext)) => (
            AddressFamily::Ipv4,
            Protocol::from_u8(header.protocol()),
            header.source_addr().into(),
            header.destination_addr().into(),
        ),
        Some(InternetSlice::Ipv6(header, _ext)) => (
            AddressFamily::Ipv6,
            Protocol::from_u8(header.next_header()),
            header.source_addr().into(),
            header.destination_addr().into(),
        ),
        None => return Err(PacketParseError::NotIp),
    };

    let mut client_port = 0;
    let mut server_port = 0;
    let mut tcp = None;
    match &sliced.transport {
        Some(TransportSlice::Tcp(header)) => {
            client_port = header.source_port();
            server_port = header.destination_port();
            tcp = Some(TcpInfo {
                syn: header.syn(),
                ack: header.ack(),
                rst: header.rst(),
                fin: header.fin(),
            });
        }
        Some(TransportSlice::Udp(header)) => {
            client_port = header.source_port();
            server_port = header.destination_port();
        }
        _ => {}
    }

    Ok(ParsedPacket {
        tuple: Tuple {
            protocol,
            client_address,
            client_port,
            server_address,
            server_port,
        },
        family,
        tcp,
        payload: sliced.payload.to_vec(),
    })
}
