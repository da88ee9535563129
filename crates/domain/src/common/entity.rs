use std::net::IpAddr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Icmpv6,
    Other(u8),
}

impl Protocol {
    /// Convert to the IP protocol number.
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Icmp => 1,
            Self::Tcp => 6,
            Self::Udp => 17,
            Self::Icmpv6 => 58,
            Self::Other(n) => n,
        }
    }

    /// Create from a raw IP protocol number.
    pub fn from_u8(n: u8) -> Self {
        match n {
            1 => Self::Icmp,
            6 => Self::Tcp,
            17 => Self::Udp,
            58 => Self::Icmpv6,
            other => Self::Other(other),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Icmp => "icmp",
            Self::Icmpv6 => "icmpv6",
            Self::Other(_) => "other",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Other(n) => write!(f, "proto-{n}"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ipv4 => "ipv4",
            Self::Ipv6 => "ipv6",
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict returned to the kernel for a queued packet.
///
/// The dispatcher never drops; `Drop` exists for the queue binding layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Drop,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Drop => "drop",
        }
    }
}

/// Client-side 5-tuple of a flow.
///
/// "Client" is the side that sent the first packet; the stored tuple is
/// the reference against which packet direction and ctid reuse are judged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tuple {
    pub protocol: Protocol,
    pub client_address: IpAddr,
    pub client_port: u16,
    pub server_address: IpAddr,
    pub server_port: u16,
}

impl Tuple {
    /// True when either endpoint is a loopback address.
    pub fn has_loopback(&self) -> bool {
        self.client_address.is_loopback() || self.server_address.is_loopback()
    }

    /// Serialise the tuple to the byte form used as a dictionary key.
    pub fn to_key_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl std::fmt::Display for Tuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}:{} -> {}:{}",
            self.protocol,
            self.client_address,
            self.client_port,
            self.server_address,
            self.server_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple() -> Tuple {
        Tuple {
            protocol: Protocol::Tcp,
            client_address: "10.0.0.5".parse().unwrap(),
            client_port: 54321,
            server_address: "93.184.216.34".parse().unwrap(),
            server_port: 443,
        }
    }

    // ── Protocol tests ────────────────────────────────────────────

    #[test]
    fn protocol_roundtrip() {
        for proto in [
            Protocol::Tcp,
            Protocol::Udp,
            Protocol::Icmp,
            Protocol::Icmpv6,
        ] {
            assert_eq!(Protocol::from_u8(proto.to_u8()), proto);
        }
    }

    #[test]
    fn protocol_other_roundtrip() {
        let proto = Protocol::Other(47); // GRE
        assert_eq!(proto.to_u8(), 47);
        assert_eq!(Protocol::from_u8(47), Protocol::Other(47));
    }

    #[test]
    fn protocol_display() {
        assert_eq!(Protocol::Tcp.to_string(), "tcp");
        assert_eq!(Protocol::Other(47).to_string(), "proto-47");
    }

    // ── Tuple tests ───────────────────────────────────────────────

    #[test]
    fn tuple_display() {
        assert_eq!(
            tuple().to_string(),
            "tcp 10.0.0.5:54321 -> 93.184.216.34:443"
        );
    }

    #[test]
    fn tuple_equality_is_byte_for_byte() {
        let a = tuple();
        let mut b = tuple();
        assert_eq!(a, b);
        b.client_port = 54322;
        assert_ne!(a, b);
    }

    #[test]
    fn tuple_loopback_detection() {
        let mut t = tuple();
        assert!(!t.has_loopback());
        t.server_address = "127.0.0.1".parse().unwrap();
        assert!(t.has_loopback());
        t = tuple();
        t.client_address = "::1".parse().unwrap();
        assert!(t.has_loopback());
    }

    // ── Verdict / family tests ────────────────────────────────────

    #[test]
    fn verdict_labels() {
        assert_eq!(Verdict::Accept.as_str(), "accept");
        assert_eq!(Verdict::Drop.as_str(), "drop");
    }

    #[test]
    fn family_labels() {
        assert_eq!(AddressFamily::Ipv4.as_str(), "ipv4");
        assert_eq!(AddressFamily::Ipv6.to_string(), "ipv6");
    }
}
