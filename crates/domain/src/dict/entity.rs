use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::common::error::DomainError;

/// A typed dictionary value.
///
/// The textual form is the `tag:payload` literal used by the device
/// protocol and by `Dictionary::dump`; `Display` and `FromStr` round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictValue {
    Bool(bool),
    Int(i64),
    Ip4(Ipv4Addr),
    Ip6(Ipv6Addr),
    Mac([u8; 6]),
    Text(String),
    Bytes(Vec<u8>),
}

impl DictValue {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Ip4(_) => "ip4",
            Self::Ip6(_) => "ip6",
            Self::Mac(_) => "mac",
            Self::Text(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Byte form for use as a dictionary key.
    ///
    /// Integers that fit 32 bits become 4 big-endian bytes so that a
    /// `int:<ctid>` key written through the device matches the key the
    /// core writes for the `sessions` table.
    pub fn to_key_bytes(&self) -> Vec<u8> {
        match self {
            Self::Bool(b) => vec![u8::from(*b)],
            Self::Int(n) => {
                if let Ok(small) = u32::try_from(*n) {
                    small.to_be_bytes().to_vec()
                } else {
                    n.to_be_bytes().to_vec()
                }
            }
            Self::Ip4(ip) => ip.octets().to_vec(),
            Self::Ip6(ip) => ip.octets().to_vec(),
            Self::Mac(mac) => mac.to_vec(),
            Self::Text(s) => s.clone().into_bytes(),
            Self::Bytes(b) => b.clone(),
        }
    }
}

impl fmt::Display for DictValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "bool:{b}"),
            Self::Int(n) => write!(f, "int:{n}"),
            Self::Ip4(ip) => write!(f, "ip4:{ip}"),
            Self::Ip6(ip) => write!(f, "ip6:{ip}"),
            Self::Mac(mac) => write!(
                f,
                "mac:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
            ),
            Self::Text(s) => write!(f, "string:{s}"),
            Self::Bytes(b) => {
                f.write_str("bytes:")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for DictValue {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, payload) = s
            .split_once(':')
            .ok_or_else(|| DomainError::InvalidValue(s.to_owned()))?;
        let invalid = || DomainError::InvalidValue(s.to_owned());
        match tag {
            "bool" => payload.parse().map(Self::Bool).map_err(|_| invalid()),
            "int" => payload.parse().map(Self::Int).map_err(|_| invalid()),
            "ip4" => payload.parse().map(Self::Ip4).map_err(|_| invalid()),
            "ip6" => payload.parse().map(Self::Ip6).map_err(|_| invalid()),
            "mac" => parse_mac(payload).ok_or_else(invalid).map(Self::Mac),
            "string" => Ok(Self::Text(payload.to_owned())),
            "bytes" => parse_hex(payload).ok_or_else(invalid).map(Self::Bytes),
            _ => Err(invalid()),
        }
    }
}

fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = s.split(':');
    for slot in &mut mac {
        *slot = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}

fn parse_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_roundtrip_every_type() {
        let values = [
            DictValue::Bool(true),
            DictValue::Bool(false),
            DictValue::Int(-42),
            DictValue::Ip4("192.168.1.1".parse().unwrap()),
            DictValue::Ip6("2001:db8::1".parse().unwrap()),
            DictValue::Mac([0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22]),
            DictValue::Text("hello world".to_owned()),
            DictValue::Bytes(vec![0xde, 0xad, 0xbe, 0xef]),
        ];
        for value in values {
            let literal = value.to_string();
            let parsed: DictValue = literal.parse().unwrap();
            assert_eq!(parsed, value, "literal {literal}");
        }
    }

    #[test]
    fn literal_formats() {
        assert_eq!(DictValue::Bool(true).to_string(), "bool:true");
        assert_eq!(DictValue::Int(7).to_string(), "int:7");
        assert_eq!(
            DictValue::Mac([0, 1, 2, 3, 4, 5]).to_string(),
            "mac:00:01:02:03:04:05"
        );
        assert_eq!(
            DictValue::Bytes(vec![0xde, 0xad]).to_string(),
            "bytes:dead"
        );
    }

    #[test]
    fn malformed_literals_rejected() {
        for bad in [
            "", "true", "bool:maybe", "int:abc", "ip4:999.1.1.1", "mac:aa:bb",
            "bytes:abc", "float:1.0",
        ] {
            assert!(bad.parse::<DictValue>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn string_payload_may_contain_colons() {
        let v: DictValue = "string:a:b:c".parse().unwrap();
        assert_eq!(v, DictValue::Text("a:b:c".to_owned()));
    }

    #[test]
    fn int_key_bytes_match_ctid_encoding() {
        let v = DictValue::Int(7);
        assert_eq!(v.to_key_bytes(), 7u32.to_be_bytes().to_vec());
    }
}
