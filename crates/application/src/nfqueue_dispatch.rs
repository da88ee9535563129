//! The per-packet entry point.
//!
//! One call per queued packet: parse, resolve the session (including ctid
//! reuse), run the subscribed plugins in priority tiers, tell the kernel
//! to bypass the flow once nobody wants it, and return accept. Invoked
//! concurrently from the queue reader threads; everything here must stay
//! brief apart from the plugin tiers themselves.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use domain::common::entity::{AddressFamily, Verdict};
use domain::common::mark;
use domain::conntrack::table::ConntrackTable;
use domain::dict::store::Dictionary;
use domain::event::PacketMessage;
use domain::packet::{self, ParsedPacket};
use domain::plugin::registry::SubscriptionRegistry;
use domain::session::entity::Session;
use domain::session::table::SessionTable;
use ports::secondary::metrics_port::MetricsPort;
use tokio::task::JoinSet;
use tokio::time::timeout;

/// Maximum time a plugin may spend on one packet. On overrun the
/// dispatcher releases the session on the plugin's behalf and moves on;
/// the handler task itself is abandoned, not cancelled.
const MAX_ALLOWED_TIME: Duration = Duration::from_secs(30);

/// Hard bound on the priority walk. Exceeding it means the subscription
/// bookkeeping is corrupt and the process must not continue.
const MAX_PRIORITY_WALK: u32 = 100;

/// Called by a plugin (or the dispatcher on its behalf) to stop receiving
/// traffic for a session. When the last subscription goes, the kernel is
/// told to bypass the flow.
pub fn release_session(dict: &Dictionary, session: &Session, owner: &str) {
    match session.release_subscription(owner) {
        Some(0) => {
            tracing::debug!(
                ctid = session.conntrack_id(),
                plugin = owner,
                "zero subscribers reached, bypassing flow"
            );
            dict.set_session_bypass(session.conntrack_id());
        }
        Some(remaining) => {
            tracing::debug!(
                ctid = session.conntrack_id(),
                plugin = owner,
                remaining,
                "nfqueue subscription released"
            );
        }
        None => {}
    }
}

pub struct PacketDispatcher {
    sessions: Arc<SessionTable>,
    conntracks: Arc<ConntrackTable>,
    dict: Arc<Dictionary>,
    registry: Arc<SubscriptionRegistry>,
    metrics: Arc<dyn MetricsPort>,
    /// Operator-controlled kill switch: short-circuits every packet to
    /// accept without touching sessions or plugins.
    bypass_all: AtomicBool,
}

impl PacketDispatcher {
    pub fn new(
        sessions: Arc<SessionTable>,
        conntracks: Arc<ConntrackTable>,
        dict: Arc<Dictionary>,
        registry: Arc<SubscriptionRegistry>,
        metrics: Arc<dyn MetricsPort>,
    ) -> Self {
        Self {
            sessions,
            conntracks,
            dict,
            registry,
            metrics,
            bypass_all: AtomicBool::new(false),
        }
    }

    pub fn set_bypass_all(&self, bypass: bool) {
        self.bypass_all.store(bypass, Ordering::Relaxed);
    }

    pub fn bypass_all(&self) -> bool {
        self.bypass_all.load(Ordering::Relaxed)
    }

    /// Process one queued packet and produce its verdict.
    ///
    /// Never drops: every error path accepts so a dispatcher problem can
    /// not take the network down.
    pub async fn dispatch(
        &self,
        ctid: u32,
        family: AddressFamily,
        data: &[u8],
        pmark: u32,
    ) -> Verdict {
        if self.bypass_all() {
            return Verdict::Accept;
        }

        let parsed = match packet::parse_ip_packet(data) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::debug!(ctid, %err, "accepting unparseable packet");
                return Verdict::Accept;
            }
        };
        if parsed.family != family {
            tracing::debug!(
                ctid,
                queue_family = %family,
                packet_family = %parsed.family,
                "address family mismatch between queue metadata and packet"
            );
        }

        // The ruleset is supposed to filter loopback before queueing;
        // seeing it here means the ruleset is misconfigured.
        if parsed.tuple.has_loopback() {
            tracing::warn!(ctid, tuple = %parsed.tuple, "nfqueue event for loopback packet");
            return Verdict::Accept;
        }

        let new_flag = mark::is_new_flow(pmark);
        let mut new_session = new_flag;

        let session = match self.sessions.find(ctid) {
            None => {
                if !new_flag {
                    // We missed the first packet of this flow. Bypass it
                    // and move on; mid-session teardown packets are the
                    // common, boring case.
                    match parsed.tcp {
                        Some(tcp) if tcp.rst => {
                            tracing::debug!(ctid, tuple = %parsed.tuple, "ignoring mid-session RST packet");
                        }
                        Some(tcp) if tcp.fin => {
                            tracing::debug!(ctid, tuple = %parsed.tuple, "ignoring mid-session FIN packet");
                        }
                        _ => {
                            tracing::info!(ctid, tuple = %parsed.tuple, "ignoring mid-session packet");
                        }
                    }
                    self.metrics.record_error("mid_session_packet");
                    self.write_bypass(ctid);
                    self.metrics.record_packet("unknown", Verdict::Accept.as_str());
                    return Verdict::Accept;
                }
                self.create_session(&parsed, ctid)
            }
            Some(existing) => {
                let session = if new_flag {
                    if parsed.tuple == *existing.client_side_tuple() {
                        // The kernel re-marked a flow it reclassified by
                        // parsing deeper headers; same tuple, same session.
                        new_session = false;
                        existing
                    } else {
                        // The ctid was reclaimed for a different flow
                        // before we saw the old one die. The old mapping
                        // is dead; the dictionary entry was already
                        // flushed by the ruleset on the first packet.
                        tracing::debug!(
                            ctid,
                            incoming = %parsed.tuple,
                            stored = %existing.client_side_tuple(),
                            "conflicting session for reused ctid, reseating"
                        );
                        self.metrics.record_error("ctid_reuse");
                        self.sessions.remove(ctid);
                        self.create_session(&parsed, ctid)
                    }
                } else {
                    new_session = false;
                    existing
                };

                if session.conntrack_id() != ctid {
                    tracing::error!(
                        ctid,
                        stored_ctid = session.conntrack_id(),
                        tuple = %parsed.tuple,
                        confirmed = session.conntrack_confirmed(),
                        "conntrack id mismatch"
                    );
                    self.metrics.record_error("conntrack_id_mismatch");
                }
                session
            }
        };

        // A conntrack record for a genuinely new session means the reuse
        // overtook the DESTROY event; drop the stale record.
        if new_session {
            if let Some(stale) = self.conntracks.remove(ctid) {
                tracing::debug!(
                    ctid,
                    new = %parsed.tuple,
                    stale = %stale.client_side_tuple,
                    "removed stale conntrack record for new session"
                );
            }
        }

        let client_to_server =
            parsed.tuple.client_address == session.client_side_tuple().client_address;

        if new_session {
            session.set_client_interface(mark::interface_id(pmark), mark::interface_type(pmark));
        }
        // A response can arrive before the conntrack NEW event that would
        // normally attribute the server interface.
        if !client_to_server && session.server_interface().0 == 0 {
            session.set_server_interface(mark::interface_id(pmark), mark::interface_type(pmark));
        }

        session.touch();
        session.record_packet(data.len());
        self.metrics
            .record_packet_bytes(parsed.family.as_str(), data.len() as u64);

        // Warn only at exact counts so a runaway flow logs twice, not
        // once per packet.
        let packets = session.packet_count();
        if packets == 100 || packets == 200 {
            tracing::warn!(
                ctid,
                tuple = %session.client_side_tuple(),
                packets,
                bytes = session.byte_count(),
                subscribers = session.subscription_count(),
                age_secs = session.age().as_secs(),
                "deep session scan"
            );
        }

        let message = Arc::new(PacketMessage {
            session: Arc::clone(&session),
            tuple: parsed.tuple,
            family: parsed.family,
            length: data.len(),
            mark: pmark,
            client_to_server,
            tcp: parsed.tcp,
            payload: parsed.payload,
        });

        let verdict = self.call_subscribers(ctid, &session, message, new_session).await;
        let direction = if client_to_server { "c2s" } else { "s2c" };
        self.metrics.record_packet(direction, verdict.as_str());
        verdict
    }

    fn create_session(&self, parsed: &ParsedPacket, ctid: u32) -> Arc<Session> {
        let session = Arc::new(Session::new(
            self.sessions.next_session_id(),
            ctid,
            parsed.tuple.clone(),
            parsed.family,
        ));
        session.attach_subscriptions(&self.registry);
        self.sessions.insert(ctid, Arc::clone(&session));
        self.metrics.session_created();
        self.metrics.set_sessions_active(self.sessions.len() as u64);
        tracing::debug!(
            ctid,
            session_id = session.session_id(),
            tuple = %session.client_side_tuple(),
            subscribers = session.subscription_count(),
            "session created"
        );
        session
    }

    fn write_bypass(&self, ctid: u32) {
        self.dict.set_session_bypass(ctid);
        self.metrics.record_bypass_write();
    }

    /// Walk the priority tiers, fanning each tier out into parallel tasks
    /// and joining it before the next.
    async fn call_subscribers(
        &self,
        ctid: u32,
        session: &Arc<Session>,
        message: Arc<PacketMessage>,
        new_session: bool,
    ) -> Verdict {
        let sublist = session.snapshot_subscriptions();
        if sublist.is_empty() {
            self.write_bypass(ctid);
            return Verdict::Accept;
        }

        let total = sublist.len();
        let mut called = 0usize;
        let mut tier = 0u32;

        while called < total {
            let mut tasks: JoinSet<(String, bool)> = JoinSet::new();
            for sub in sublist.iter().filter(|s| s.priority.tier() == tier) {
                called += 1;
                let owner = sub.owner.clone();
                let handler = Arc::clone(&sub.handler);
                let message = Arc::clone(&message);
                let metrics = Arc::clone(&self.metrics);
                tasks.spawn(async move {
                    let started = Instant::now();
                    // The handler runs in its own task so a timeout
                    // abandons it rather than cancelling mid-flight.
                    let work =
                        tokio::spawn(
                            async move { handler.handle(message, ctid, new_session).await },
                        );
                    let release = match timeout(MAX_ALLOWED_TIME, work).await {
                        Ok(Ok(verdict)) => verdict.session_release,
                        Ok(Err(err)) => {
                            tracing::error!(plugin = %owner, ctid, %err, "nfqueue plugin task failed");
                            metrics.record_error("nfqueue_plugin_panic");
                            true
                        }
                        Err(_) => {
                            tracing::error!(plugin = %owner, ctid, "timeout reached while processing nfqueue packet");
                            metrics.record_plugin_timeout(&owner);
                            metrics.record_error("nfqueue_plugin_timeout");
                            true
                        }
                    };
                    metrics.observe_plugin_duration(&owner, started.elapsed().as_secs_f64());
                    (owner, release)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((owner, true)) => {
                        self.metrics.record_session_release(&owner);
                        release_session(&self.dict, session, &owner);
                    }
                    Ok((_, false)) => {}
                    Err(err) => {
                        tracing::error!(ctid, %err, "nfqueue fan-out task failed");
                        self.metrics.record_error("nfqueue_plugin_panic");
                    }
                }
            }

            tier += 1;
            if tier > MAX_PRIORITY_WALK {
                tracing::error!(
                    ctid,
                    called,
                    total,
                    "priority walk exceeded bound, subscription state corrupt"
                );
                self.metrics.record_error("nfqueue_priority_constraint");
                panic!("nfqueue priority walk exceeded {MAX_PRIORITY_WALK} tiers");
            }
        }

        Verdict::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    use domain::common::entity::{Protocol, Tuple};
    use domain::dict::entity::DictValue;
    use domain::plugin::entity::{BoxFuture, NfqueuePlugin, PluginPriority, PluginVerdict};
    use etherparse::PacketBuilder;
    use ports::secondary::metrics_port::{
        ErrorMetrics, EventMetrics, PacketMetrics, PluginMetrics, SessionMetrics,
    };

    const NEW_MARK: u32 = mark::NEW_FLOW | 0x0100_0000 | 0x02;

    // ── Test doubles ──────────────────────────────────────────────

    #[derive(Default)]
    struct TestMetrics {
        errors: Mutex<Vec<String>>,
        bypass_writes: AtomicU32,
        timeouts: AtomicU32,
        created: AtomicU32,
    }

    impl PacketMetrics for TestMetrics {}
    impl SessionMetrics for TestMetrics {
        fn session_created(&self) {
            self.created.fetch_add(1, Ordering::Relaxed);
        }

        fn record_bypass_write(&self) {
            self.bypass_writes.fetch_add(1, Ordering::Relaxed);
        }
    }
    impl PluginMetrics for TestMetrics {
        fn record_plugin_timeout(&self, _plugin: &str) {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }
    impl EventMetrics for TestMetrics {}
    impl ErrorMetrics for TestMetrics {
        fn record_error(&self, reason: &str) {
            self.errors.lock().unwrap().push(reason.to_owned());
        }
    }

    impl TestMetrics {
        fn errors(&self) -> Vec<String> {
            self.errors.lock().unwrap().clone()
        }
    }

    /// Plugin that records invocation order and optionally sleeps or
    /// releases.
    struct ScriptedPlugin {
        name: String,
        calls: Arc<Mutex<Vec<String>>>,
        release: bool,
        sleep: Option<Duration>,
    }

    impl NfqueuePlugin for ScriptedPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        fn handle<'a>(
            &'a self,
            _message: Arc<PacketMessage>,
            _ctid: u32,
            _new_session: bool,
        ) -> BoxFuture<'a, PluginVerdict> {
            Box::pin(async move {
                if let Some(sleep) = self.sleep {
                    tokio::time::sleep(sleep).await;
                }
                self.calls.lock().unwrap().push(self.name.clone());
                PluginVerdict {
                    session_release: self.release,
                }
            })
        }
    }

    struct Harness {
        dispatcher: PacketDispatcher,
        sessions: Arc<SessionTable>,
        conntracks: Arc<ConntrackTable>,
        dict: Arc<Dictionary>,
        registry: Arc<SubscriptionRegistry>,
        metrics: Arc<TestMetrics>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Harness {
        fn new() -> Self {
            let sessions = Arc::new(SessionTable::new());
            let conntracks = Arc::new(ConntrackTable::new());
            let dict = Arc::new(Dictionary::new());
            let registry = Arc::new(SubscriptionRegistry::new());
            let metrics = Arc::new(TestMetrics::default());
            let dispatcher = PacketDispatcher::new(
                Arc::clone(&sessions),
                Arc::clone(&conntracks),
                Arc::clone(&dict),
                Arc::clone(&registry),
                Arc::clone(&metrics) as Arc<dyn MetricsPort>,
            );
            Self {
                dispatcher,
                sessions,
                conntracks,
                dict,
                registry,
                metrics,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn add_plugin(&self, name: &str, priority: PluginPriority, release: bool) {
            self.add_plugin_with_sleep(name, priority, release, None);
        }

        fn add_plugin_with_sleep(
            &self,
            name: &str,
            priority: PluginPriority,
            release: bool,
            sleep: Option<Duration>,
        ) {
            self.registry
                .insert_nfqueue_subscription(
                    name,
                    priority,
                    Arc::new(ScriptedPlugin {
                        name: name.to_owned(),
                        calls: Arc::clone(&self.calls),
                        release,
                        sleep,
                    }),
                )
                .unwrap();
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn tcp_packet(src: [u8; 4], src_port: u16, payload: &[u8]) -> Vec<u8> {
        let builder =
            PacketBuilder::ipv4(src, [93, 184, 216, 34], 64).tcp(src_port, 443, 1000, 64);
        let mut out = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut out, payload).unwrap();
        out
    }

    fn tcp_packet_flag(src: [u8; 4], src_port: u16, flag: &str) -> Vec<u8> {
        let builder =
            PacketBuilder::ipv4(src, [93, 184, 216, 34], 64).tcp(src_port, 443, 1000, 64);
        let builder = match flag {
            "rst" => builder.rst(),
            "fin" => builder.fin(),
            _ => builder,
        };
        let mut out = Vec::with_capacity(builder.size(0));
        builder.write(&mut out, &[]).unwrap();
        out
    }

    async fn dispatch(h: &Harness, ctid: u32, data: &[u8], pmark: u32) -> Verdict {
        h.dispatcher
            .dispatch(ctid, AddressFamily::Ipv4, data, pmark)
            .await
    }

    // ── Scenario: new IPv4 TCP flow ───────────────────────────────

    #[tokio::test]
    async fn new_flow_creates_session() {
        let h = Harness::new();
        h.add_plugin("example", PluginPriority::Example, false);

        let data = tcp_packet([10, 0, 0, 5], 54321, b"hello");
        let verdict = dispatch(&h, 7, &data, mark::NEW_FLOW | 0x02).await;

        assert_eq!(verdict, Verdict::Accept);
        let session = h.sessions.find(7).expect("session should exist");
        assert_eq!(session.conntrack_id(), 7);
        assert_eq!(session.packet_count(), 1);
        assert_eq!(session.byte_count(), data.len() as u64);
        assert_eq!(session.client_interface(), (2, 0));
        assert_eq!(session.subscription_count(), 1);
        assert_eq!(
            *session.client_side_tuple(),
            Tuple {
                protocol: Protocol::Tcp,
                client_address: "10.0.0.5".parse::<IpAddr>().unwrap(),
                client_port: 54321,
                server_address: "93.184.216.34".parse::<IpAddr>().unwrap(),
                server_port: 443,
            }
        );
        assert_eq!(h.metrics.created.load(Ordering::Relaxed), 1);
        assert!(!h.dict.session_bypassed(7));
    }

    #[tokio::test]
    async fn interface_type_extracted_from_mark() {
        let h = Harness::new();
        h.add_plugin("example", PluginPriority::Example, false);
        let data = tcp_packet([10, 0, 0, 5], 54321, b"");
        dispatch(&h, 7, &data, NEW_MARK).await;
        assert_eq!(h.sessions.find(7).unwrap().client_interface(), (2, 1));
    }

    // ── Scenario: mid-flow packet without session ─────────────────

    #[tokio::test]
    async fn mid_flow_without_session_bypasses() {
        let h = Harness::new();
        h.add_plugin("example", PluginPriority::Example, false);

        let data = tcp_packet([10, 0, 0, 5], 54321, b"late");
        let verdict = dispatch(&h, 9, &data, 0x02).await;

        assert_eq!(verdict, Verdict::Accept);
        assert!(h.sessions.find(9).is_none());
        assert!(h.dict.session_bypassed(9));
        assert!(h.calls().is_empty());
        assert!(h.metrics.errors().contains(&"mid_session_packet".to_owned()));
    }

    #[tokio::test]
    async fn mid_flow_rst_and_fin_also_bypass() {
        let h = Harness::new();
        for (ctid, flag) in [(21, "rst"), (22, "fin")] {
            let data = tcp_packet_flag([10, 0, 0, 5], 54321, flag);
            assert_eq!(dispatch(&h, ctid, &data, 0).await, Verdict::Accept);
            assert!(h.dict.session_bypassed(ctid));
        }
    }

    // ── Scenario: ctid reuse ──────────────────────────────────────

    #[tokio::test]
    async fn ctid_reuse_with_conflicting_tuple_reseats() {
        let h = Harness::new();
        h.add_plugin("example", PluginPriority::Example, false);

        let first = tcp_packet([10, 0, 0, 5], 54321, b"");
        dispatch(&h, 7, &first, mark::NEW_FLOW).await;
        let s1_id = h.sessions.find(7).unwrap().session_id();

        // Mark something the core must NOT flush during reseating.
        h.dict
            .set_session_field(7, "client_hostname", DictValue::Text("old".into()));

        let second = tcp_packet([10, 0, 0, 99], 40000, b"");
        dispatch(&h, 7, &second, mark::NEW_FLOW).await;

        let s2 = h.sessions.find(7).unwrap();
        assert_ne!(s2.session_id(), s1_id);
        assert_eq!(s2.client_side_tuple().client_port, 40000);
        assert_eq!(s2.packet_count(), 1);
        assert_eq!(
            h.dict.session_field(7, "client_hostname"),
            Some(DictValue::Text("old".into()))
        );
        assert!(h.metrics.errors().contains(&"ctid_reuse".to_owned()));
    }

    #[tokio::test]
    async fn renewed_mark_with_same_tuple_is_not_a_new_session() {
        let h = Harness::new();
        h.add_plugin("example", PluginPriority::Example, false);

        let data = tcp_packet([10, 0, 0, 5], 54321, b"");
        dispatch(&h, 7, &data, mark::NEW_FLOW).await;
        let s1_id = h.sessions.find(7).unwrap().session_id();

        // Kernel re-marks a deeper-parsed flow as new; tuple unchanged.
        dispatch(&h, 7, &data, mark::NEW_FLOW).await;

        let session = h.sessions.find(7).unwrap();
        assert_eq!(session.session_id(), s1_id);
        assert_eq!(session.packet_count(), 2);
    }

    #[tokio::test]
    async fn stale_conntrack_removed_for_new_session() {
        use domain::conntrack::entity::ConntrackEntry;
        use domain::event::{ConntrackEvent, ConntrackEventKind};

        let h = Harness::new();
        let stale_event = ConntrackEvent {
            kind: ConntrackEventKind::New,
            conntrack_id: 7,
            original: Tuple {
                protocol: Protocol::Tcp,
                client_address: "172.16.0.1".parse().unwrap(),
                client_port: 1111,
                server_address: "172.16.0.2".parse().unwrap(),
                server_port: 2222,
            },
            reply: Tuple {
                protocol: Protocol::Tcp,
                client_address: "172.16.0.2".parse().unwrap(),
                client_port: 2222,
                server_address: "172.16.0.1".parse().unwrap(),
                server_port: 1111,
            },
            orig_packets: 0,
            orig_bytes: 0,
            reply_packets: 0,
            reply_bytes: 0,
            timestamp_start_ns: 0,
            timestamp_stop_ns: 0,
            mark: 0,
        };
        h.conntracks.insert(7, ConntrackEntry::from_event(&stale_event));

        let data = tcp_packet([10, 0, 0, 5], 54321, b"");
        dispatch(&h, 7, &data, mark::NEW_FLOW).await;

        assert!(h.conntracks.find(7).is_none());
        assert!(h.sessions.find(7).is_some());
    }

    #[tokio::test]
    async fn stored_ctid_mismatch_is_counted() {
        let h = Harness::new();
        // Seat a session under key 7 whose own ctid claims 9.
        let tuple = Tuple {
            protocol: Protocol::Tcp,
            client_address: "10.0.0.5".parse().unwrap(),
            client_port: 54321,
            server_address: "93.184.216.34".parse().unwrap(),
            server_port: 443,
        };
        let rogue = Arc::new(Session::new(99, 9, tuple, AddressFamily::Ipv4));
        h.sessions.insert(7, rogue);

        let data = tcp_packet([10, 0, 0, 5], 54321, b"");
        let verdict = dispatch(&h, 7, &data, 0).await;

        assert_eq!(verdict, Verdict::Accept);
        assert!(h
            .metrics
            .errors()
            .contains(&"conntrack_id_mismatch".to_owned()));
    }

    // ── Direction and interface attribution ───────────────────────

    #[tokio::test]
    async fn server_to_client_packet_sets_server_interface() {
        let h = Harness::new();
        h.add_plugin("example", PluginPriority::Example, false);

        let c2s = tcp_packet([10, 0, 0, 5], 54321, b"");
        dispatch(&h, 7, &c2s, mark::NEW_FLOW | 0x02).await;
        assert_eq!(h.sessions.find(7).unwrap().server_interface(), (0, 0));

        // Response travels the other way; interface id 3, type 2.
        let builder = PacketBuilder::ipv4([93, 184, 216, 34], [10, 0, 0, 5], 64)
            .tcp(443, 54321, 5000, 64);
        let mut s2c = Vec::with_capacity(builder.size(0));
        builder.write(&mut s2c, &[]).unwrap();
        dispatch(&h, 7, &s2c, 0x0200_0000 | 0x03).await;

        let session = h.sessions.find(7).unwrap();
        assert_eq!(session.server_interface(), (3, 2));
        assert_eq!(session.client_interface(), (2, 0));
        assert_eq!(session.packet_count(), 2);
    }

    // ── Plugin pipeline ───────────────────────────────────────────

    #[tokio::test]
    async fn tiers_run_in_priority_order() {
        let h = Harness::new();
        h.add_plugin("classify", PluginPriority::Classify, false);
        h.add_plugin("geoip", PluginPriority::Geoip, false);
        h.add_plugin("dns", PluginPriority::Dns, false);

        let data = tcp_packet([10, 0, 0, 5], 54321, b"");
        dispatch(&h, 7, &data, mark::NEW_FLOW).await;

        assert_eq!(h.calls(), vec!["geoip", "dns", "classify"]);
    }

    #[tokio::test]
    async fn empty_subscription_set_bypasses_immediately() {
        let h = Harness::new();
        // No plugins registered at all.
        let data = tcp_packet([10, 0, 0, 5], 54321, b"");
        let verdict = dispatch(&h, 7, &data, mark::NEW_FLOW).await;

        assert_eq!(verdict, Verdict::Accept);
        assert!(h.dict.session_bypassed(7));
        assert!(h.metrics.bypass_writes.load(Ordering::Relaxed) >= 1);
    }

    // ── Scenario: bypass propagation ──────────────────────────────

    #[tokio::test]
    async fn all_subscribers_releasing_writes_bypass() {
        let h = Harness::new();
        h.add_plugin("geoip", PluginPriority::Geoip, true);
        h.add_plugin("dns", PluginPriority::Dns, true);
        h.add_plugin("example", PluginPriority::Example, true);

        let data = tcp_packet([10, 0, 0, 5], 54321, b"");
        dispatch(&h, 7, &data, mark::NEW_FLOW).await;

        let session = h.sessions.find(7).unwrap();
        assert_eq!(session.subscription_count(), 0);
        assert!(h.dict.session_bypassed(7));
        assert_eq!(h.calls().len(), 3);
    }

    #[tokio::test]
    async fn partial_release_keeps_flow_subscribed() {
        let h = Harness::new();
        h.add_plugin("geoip", PluginPriority::Geoip, true);
        h.add_plugin("example", PluginPriority::Example, false);

        let data = tcp_packet([10, 0, 0, 5], 54321, b"");
        dispatch(&h, 7, &data, mark::NEW_FLOW).await;

        let session = h.sessions.find(7).unwrap();
        assert_eq!(session.subscription_count(), 1);
        assert!(!h.dict.session_bypassed(7));

        // Released plugin is not called for the next packet.
        dispatch(&h, 7, &data, 0).await;
        assert_eq!(
            h.calls(),
            vec!["geoip", "example", "example"],
        );
    }

    // ── Scenario: plugin timeout ──────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn hung_plugin_is_released_after_watchdog() {
        let h = Harness::new();
        h.add_plugin_with_sleep(
            "dns",
            PluginPriority::Dns,
            false,
            Some(Duration::from_secs(86_400)),
        );
        h.add_plugin("example", PluginPriority::Example, false);

        let data = tcp_packet([10, 0, 0, 5], 54321, b"");
        let verdict = dispatch(&h, 7, &data, mark::NEW_FLOW).await;

        assert_eq!(verdict, Verdict::Accept);
        let session = h.sessions.find(7).unwrap();
        // The hung plugin was released on its behalf; later tiers ran.
        assert_eq!(session.subscription_count(), 1);
        assert_eq!(h.calls(), vec!["example"]);
        assert_eq!(h.metrics.timeouts.load(Ordering::Relaxed), 1);
        assert!(h
            .metrics
            .errors()
            .contains(&"nfqueue_plugin_timeout".to_owned()));
    }

    #[tokio::test]
    async fn panicking_plugin_is_treated_as_release() {
        struct PanicPlugin;
        impl NfqueuePlugin for PanicPlugin {
            fn name(&self) -> &str {
                "panic"
            }

            fn handle<'a>(
                &'a self,
                _message: Arc<PacketMessage>,
                _ctid: u32,
                _new_session: bool,
            ) -> BoxFuture<'a, PluginVerdict> {
                Box::pin(async { panic!("handler exploded") })
            }
        }

        let h = Harness::new();
        h.registry
            .insert_nfqueue_subscription("panic", PluginPriority::Geoip, Arc::new(PanicPlugin))
            .unwrap();
        h.add_plugin("example", PluginPriority::Example, false);

        let data = tcp_packet([10, 0, 0, 5], 54321, b"");
        let verdict = dispatch(&h, 7, &data, mark::NEW_FLOW).await;

        assert_eq!(verdict, Verdict::Accept);
        let session = h.sessions.find(7).unwrap();
        assert_eq!(session.subscription_count(), 1);
        assert_eq!(h.calls(), vec!["example"]);
        assert!(h
            .metrics
            .errors()
            .contains(&"nfqueue_plugin_panic".to_owned()));
    }

    // ── Global bypass and parse failures ──────────────────────────

    #[tokio::test]
    async fn global_bypass_short_circuits() {
        let h = Harness::new();
        h.add_plugin("example", PluginPriority::Example, false);
        h.dispatcher.set_bypass_all(true);

        let data = tcp_packet([10, 0, 0, 5], 54321, b"");
        let verdict = dispatch(&h, 7, &data, mark::NEW_FLOW).await;

        assert_eq!(verdict, Verdict::Accept);
        assert!(h.sessions.find(7).is_none());
        assert!(h.calls().is_empty());

        h.dispatcher.set_bypass_all(false);
        dispatch(&h, 7, &data, mark::NEW_FLOW).await;
        assert!(h.sessions.find(7).is_some());
    }

    #[tokio::test]
    async fn non_ip_data_is_accepted_untouched() {
        let h = Harness::new();
        let verdict = dispatch(&h, 7, &[0xde, 0xad], mark::NEW_FLOW).await;
        assert_eq!(verdict, Verdict::Accept);
        assert!(h.sessions.find(7).is_none());
        assert!(!h.dict.session_bypassed(7));
    }

    #[tokio::test]
    async fn loopback_packet_is_accepted_without_session() {
        let h = Harness::new();
        let data = tcp_packet([127, 0, 0, 1], 54321, b"");
        let verdict = dispatch(&h, 7, &data, mark::NEW_FLOW).await;
        assert_eq!(verdict, Verdict::Accept);
        assert!(h.sessions.find(7).is_none());
    }

    // ── release_session ───────────────────────────────────────────

    #[tokio::test]
    async fn out_of_band_release_writes_bypass_on_empty() {
        let h = Harness::new();
        h.add_plugin("geoip", PluginPriority::Geoip, false);
        let data = tcp_packet([10, 0, 0, 5], 54321, b"");
        dispatch(&h, 7, &data, mark::NEW_FLOW).await;

        let session = h.sessions.find(7).unwrap();
        release_session(&h.dict, &session, "geoip");
        assert_eq!(session.subscription_count(), 0);
        assert!(h.dict.session_bypassed(7));

        // Releasing a non-subscriber is a no-op.
        release_session(&h.dict, &session, "ghost");
    }
}
