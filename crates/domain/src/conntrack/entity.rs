use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::common::entity::Tuple;
use crate::event::ConntrackEvent;
use crate::session::entity::Session;

/// Userspace mirror of one kernel flow-tracking entry.
///
/// May exist without a session (purely kernel-side traffic) and vice
/// versa (a very early packet before the NEW event). The session link is
/// weak: the session table owns session lifetime.
#[derive(Debug, Clone)]
pub struct ConntrackEntry {
    pub conntrack_id: u32,
    pub client_side_tuple: Tuple,
    pub reply_side_tuple: Tuple,
    pub orig_packets: u64,
    pub orig_bytes: u64,
    pub reply_packets: u64,
    pub reply_bytes: u64,
    pub mark: u32,
    pub conntrack_confirmed: bool,
    pub last_update: Instant,
    pub session: Option<Weak<Session>>,
}

impl ConntrackEntry {
    pub fn from_event(event: &ConntrackEvent) -> Self {
        Self {
            conntrack_id: event.conntrack_id,
            client_side_tuple: event.original.clone(),
            reply_side_tuple: event.reply.clone(),
            orig_packets: event.orig_packets,
            orig_bytes: event.orig_bytes,
            reply_packets: event.reply_packets,
            reply_bytes: event.reply_bytes,
            mark: event.mark,
            conntrack_confirmed: false,
            last_update: Instant::now(),
            session: None,
        }
    }

    /// Refresh the kernel-maintained counters from an UPDATE event.
    pub fn refresh(&mut self, event: &ConntrackEvent) {
        self.orig_packets = event.orig_packets;
        self.orig_bytes = event.orig_bytes;
        self.reply_packets = event.reply_packets;
        self.reply_bytes = event.reply_bytes;
        self.mark = event.mark;
        self.last_update = Instant::now();
    }

    /// Resolve the paired session, if it is still alive.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.as_ref()?.upgrade()
    }
}
