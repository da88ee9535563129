use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::common::entity::{AddressFamily, Tuple};
use crate::plugin::entity::NfqueueSubscription;
use crate::plugin::registry::SubscriptionRegistry;

/// One flow in userspace.
///
/// Identity (`session_id`, `conntrack_id`, client-side tuple, family) is
/// fixed at creation; a ctid reclaimed for a different tuple produces a
/// fresh `Session`, never a mutation. Counters and interface attribution
/// use atomics so concurrent packet handling never takes the table lock
/// for accounting.
pub struct Session {
    session_id: u64,
    conntrack_id: u32,
    creation_time: Instant,
    family: AddressFamily,
    client_side_tuple: Tuple,

    last_activity: RwLock<Instant>,
    packet_count: AtomicU64,
    byte_count: AtomicU64,
    event_count: AtomicU64,

    client_interface_id: AtomicU8,
    client_interface_type: AtomicU8,
    server_interface_id: AtomicU8,
    server_interface_type: AtomicU8,

    conntrack_confirmed: AtomicBool,

    /// Plugin-owned opaque state, keyed by a plugin-chosen name.
    attachments: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,

    /// Live per-session subscription set, snapshotted from the global
    /// registry at creation and shrunk by releases.
    subscriptions: RwLock<HashMap<String, NfqueueSubscription>>,
}

impl Session {
    pub fn new(
        session_id: u64,
        conntrack_id: u32,
        client_side_tuple: Tuple,
        family: AddressFamily,
    ) -> Self {
        let now = Instant::now();
        Self {
            session_id,
            conntrack_id,
            creation_time: now,
            family,
            client_side_tuple,
            last_activity: RwLock::new(now),
            packet_count: AtomicU64::new(0),
            byte_count: AtomicU64::new(0),
            event_count: AtomicU64::new(0),
            client_interface_id: AtomicU8::new(0),
            client_interface_type: AtomicU8::new(0),
            server_interface_id: AtomicU8::new(0),
            server_interface_type: AtomicU8::new(0),
            conntrack_confirmed: AtomicBool::new(false),
            attachments: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn conntrack_id(&self) -> u32 {
        self.conntrack_id
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn client_side_tuple(&self) -> &Tuple {
        &self.client_side_tuple
    }

    pub fn creation_time(&self) -> Instant {
        self.creation_time
    }

    pub fn age(&self) -> Duration {
        self.creation_time.elapsed()
    }

    // ── Activity accounting ───────────────────────────────────────

    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.read()
    }

    pub fn idle(&self) -> Duration {
        self.last_activity().elapsed()
    }

    /// Record one packet of `length` bytes against the counters.
    pub fn record_packet(&self, length: usize) {
        self.packet_count.fetch_add(1, Ordering::Relaxed);
        self.byte_count.fetch_add(length as u64, Ordering::Relaxed);
        self.event_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_count(&self) -> u64 {
        self.packet_count.load(Ordering::Relaxed)
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count.load(Ordering::Relaxed)
    }

    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::Relaxed)
    }

    // ── Interface attribution ─────────────────────────────────────

    pub fn set_client_interface(&self, id: u8, itype: u8) {
        self.client_interface_id.store(id, Ordering::Relaxed);
        self.client_interface_type.store(itype, Ordering::Relaxed);
    }

    pub fn client_interface(&self) -> (u8, u8) {
        (
            self.client_interface_id.load(Ordering::Relaxed),
            self.client_interface_type.load(Ordering::Relaxed),
        )
    }

    pub fn set_server_interface(&self, id: u8, itype: u8) {
        self.server_interface_id.store(id, Ordering::Relaxed);
        self.server_interface_type.store(itype, Ordering::Relaxed);
    }

    pub fn server_interface(&self) -> (u8, u8) {
        (
            self.server_interface_id.load(Ordering::Relaxed),
            self.server_interface_type.load(Ordering::Relaxed),
        )
    }

    pub fn set_conntrack_confirmed(&self, confirmed: bool) {
        self.conntrack_confirmed.store(confirmed, Ordering::Relaxed);
    }

    pub fn conntrack_confirmed(&self) -> bool {
        self.conntrack_confirmed.load(Ordering::Relaxed)
    }

    // ── Attachments ───────────────────────────────────────────────

    pub fn set_attachment(&self, key: impl Into<String>, value: Arc<dyn Any + Send + Sync>) {
        self.attachments.write().insert(key.into(), value);
    }

    pub fn attachment(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.attachments.read().get(key).cloned()
    }

    pub fn remove_attachment(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.attachments.write().remove(key)
    }

    // ── Subscriptions ─────────────────────────────────────────────

    /// Snapshot the global nfqueue subscription set into this session.
    /// Called once at creation.
    pub fn attach_subscriptions(&self, registry: &SubscriptionRegistry) {
        let mut subs = self.subscriptions.write();
        for sub in registry.nfqueue_snapshot() {
            subs.insert(sub.owner.clone(), sub);
        }
    }

    /// Copy of the live subscription set, taken once per packet so the
    /// lock is never held while handlers run.
    pub fn snapshot_subscriptions(&self) -> Vec<NfqueueSubscription> {
        self.subscriptions.read().values().cloned().collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Drop `owner`'s subscription. Returns the number of subscriptions
    /// remaining, or `None` when the owner held none.
    pub fn release_subscription(&self, owner: &str) -> Option<usize> {
        let mut subs = self.subscriptions.write();
        subs.remove(owner)?;
        Some(subs.len())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("conntrack_id", &self.conntrack_id)
            .field("tuple", &self.client_side_tuple)
            .field("packets", &self.packet_count())
            .field("subscriptions", &self.subscription_count())
            .finish_non_exhaustive()
    }
}
