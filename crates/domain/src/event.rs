//! Typed kernel events consumed by the dispatchers.
//!
//! The netlink deserialisation that produces these lives at the edge; the
//! dispatchers and plugins only ever see these shapes.

use std::sync::Arc;

use crate::common::entity::{AddressFamily, Tuple};
use crate::session::entity::Session;

/// TCP header flags relevant to session resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpInfo {
    pub syn: bool,
    pub ack: bool,
    pub rst: bool,
    pub fin: bool,
}

/// One queued packet, resolved to its session, as handed to nfqueue
/// plugin handlers.
#[derive(Clone)]
pub struct PacketMessage {
    pub session: Arc<Session>,
    pub tuple: Tuple,
    pub family: AddressFamily,
    pub length: usize,
    pub mark: u32,
    /// True when the packet's source is the session's client address.
    pub client_to_server: bool,
    pub tcp: Option<TcpInfo>,
    /// Application payload, empty when the packet carries none.
    pub payload: Vec<u8>,
}

impl std::fmt::Debug for PacketMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketMessage")
            .field("tuple", &self.tuple)
            .field("length", &self.length)
            .field("mark", &format_args!("{:#010x}", self.mark))
            .field("client_to_server", &self.client_to_server)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConntrackEventKind {
    New,
    Update,
    Destroy,
}

impl ConntrackEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Update => "update",
            Self::Destroy => "destroy",
        }
    }
}

/// One conntrack lifecycle event from the kernel.
#[derive(Debug, Clone)]
pub struct ConntrackEvent {
    pub kind: ConntrackEventKind,
    pub conntrack_id: u32,
    pub original: Tuple,
    pub reply: Tuple,
    pub orig_packets: u64,
    pub orig_bytes: u64,
    pub reply_packets: u64,
    pub reply_bytes: u64,
    pub timestamp_start_ns: u64,
    pub timestamp_stop_ns: u64,
    pub mark: u32,
}

/// One NFLOG sampling record. Independent of sessions.
#[derive(Debug, Clone)]
pub struct NetloggerEvent {
    pub tuple: Tuple,
    pub prefix: String,
    pub mark: u32,
    pub interface_id: u8,
    /// Leading bytes of the logged payload, as captured by the target.
    pub payload_prefix: Vec<u8>,
}
