use std::sync::atomic::AtomicU64;

use ports::secondary::metrics_port::{
    ErrorMetrics, EventMetrics, PacketMetrics, PluginMetrics, SessionMetrics,
};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets_range};
use prometheus_client::registry::Registry;

// ── Label types ─────────────────────────────────────────────────────

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PacketLabels {
    pub direction: String,
    pub verdict: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FamilyLabels {
    pub family: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReasonLabels {
    pub reason: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PluginLabels {
    pub plugin: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct KindLabels {
    pub kind: String,
}

// ── Daemon metrics registry ─────────────────────────────────────────

/// Prometheus metrics registry for the daemon.
///
/// All metric families use interior mutability (atomics), so recording
/// metrics only requires `&self`. The registry itself is NOT Clone;
/// wrap in `Arc` for multi-task sharing.
pub struct DaemonMetrics {
    registry: Registry,
    pub packets_total: Family<PacketLabels, Counter>,
    pub packet_bytes_total: Family<FamilyLabels, Counter>,
    pub sessions_active: Gauge,
    pub sessions_created_total: Counter,
    pub sessions_removed_total: Family<ReasonLabels, Counter>,
    pub bypass_writes_total: Counter,
    pub plugin_timeouts_total: Family<PluginLabels, Counter>,
    pub session_releases_total: Family<PluginLabels, Counter>,
    pub plugin_duration_seconds: Family<PluginLabels, Histogram>,
    pub conntrack_events_total: Family<KindLabels, Counter>,
    pub netlogger_events_total: Counter,
    pub events_dropped_total: Family<ReasonLabels, Counter>,
    pub errors_total: Family<ReasonLabels, Counter>,
    pub uptime_seconds: Gauge<f64, AtomicU64>,
}

impl DaemonMetrics {
    /// Create a new metrics registry with all metrics registered under
    /// the `flowsentry` prefix.
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("flowsentry");

        let packets_total = Family::<PacketLabels, Counter>::default();
        registry.register(
            "packets",
            "Packets dispatched through the nfqueue pipeline",
            packets_total.clone(),
        );

        let packet_bytes_total = Family::<FamilyLabels, Counter>::default();
        registry.register(
            "packet_bytes",
            "Bytes seen by the nfqueue pipeline",
            packet_bytes_total.clone(),
        );

        let sessions_active = Gauge::default();
        registry.register(
            "sessions_active",
            "Sessions currently seated in the session table",
            sessions_active.clone(),
        );

        let sessions_created_total = Counter::default();
        registry.register(
            "sessions_created",
            "Sessions created by the dispatcher",
            sessions_created_total.clone(),
        );

        let sessions_removed_total = Family::<ReasonLabels, Counter>::default();
        registry.register(
            "sessions_removed",
            "Sessions removed, by reason",
            sessions_removed_total.clone(),
        );

        let bypass_writes_total = Counter::default();
        registry.register(
            "bypass_writes",
            "bypass_packetd=true writes to the dictionary",
            bypass_writes_total.clone(),
        );

        let plugin_timeouts_total = Family::<PluginLabels, Counter>::default();
        registry.register(
            "plugin_timeouts",
            "Plugin handlers abandoned by the watchdog",
            plugin_timeouts_total.clone(),
        );

        let session_releases_total = Family::<PluginLabels, Counter>::default();
        registry.register(
            "session_releases",
            "Session releases, by plugin",
            session_releases_total.clone(),
        );

        let plugin_duration_seconds = Family::<PluginLabels, Histogram>::new_with_constructor(|| {
            // Exponential buckets from 10μs to 30s (watchdog ceiling)
            Histogram::new(exponential_buckets_range(0.000_01, 30.0, 12))
        });
        registry.register(
            "plugin_duration_seconds",
            "Per-plugin handler latency in seconds",
            plugin_duration_seconds.clone(),
        );

        let conntrack_events_total = Family::<KindLabels, Counter>::default();
        registry.register(
            "conntrack_events",
            "Conntrack lifecycle events, by kind",
            conntrack_events_total.clone(),
        );

        let netlogger_events_total = Counter::default();
        registry.register(
            "netlogger_events",
            "NFLOG sampling events delivered",
            netlogger_events_total.clone(),
        );

        let events_dropped_total = Family::<ReasonLabels, Counter>::default();
        registry.register(
            "events_dropped",
            "Events dropped due to backpressure or errors",
            events_dropped_total.clone(),
        );

        let errors_total = Family::<ReasonLabels, Counter>::default();
        registry.register(
            "errors",
            "Counted error conditions",
            errors_total.clone(),
        );

        let uptime_seconds = Gauge::<f64, AtomicU64>::default();
        registry.register(
            "uptime_seconds",
            "Seconds since daemon start",
            uptime_seconds.clone(),
        );

        Self {
            registry,
            packets_total,
            packet_bytes_total,
            sessions_active,
            sessions_created_total,
            sessions_removed_total,
            bypass_writes_total,
            plugin_timeouts_total,
            session_releases_total,
            plugin_duration_seconds,
            conntrack_events_total,
            netlogger_events_total,
            events_dropped_total,
            errors_total,
            uptime_seconds,
        }
    }

    /// Encode the registry in the OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut out = String::new();
        prometheus_client::encoding::text::encode(&mut out, &self.registry)?;
        Ok(out)
    }
}

impl Default for DaemonMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// ── Port implementations ────────────────────────────────────────────

impl PacketMetrics for DaemonMetrics {
    fn record_packet(&self, direction: &str, verdict: &str) {
        self.packets_total
            .get_or_create(&PacketLabels {
                direction: direction.to_string(),
                verdict: verdict.to_string(),
            })
            .inc();
    }

    fn record_packet_bytes(&self, family: &str, bytes: u64) {
        self.packet_bytes_total
            .get_or_create(&FamilyLabels {
                family: family.to_string(),
            })
            .inc_by(bytes);
    }
}

impl SessionMetrics for DaemonMetrics {
    fn session_created(&self) {
        self.sessions_created_total.inc();
    }

    fn session_removed(&self, reason: &str) {
        self.sessions_removed_total
            .get_or_create(&ReasonLabels {
                reason: reason.to_string(),
            })
            .inc();
    }

    fn set_sessions_active(&self, count: u64) {
        self.sessions_active.set(count as i64);
    }

    fn record_bypass_write(&self) {
        self.bypass_writes_total.inc();
    }
}

impl PluginMetrics for DaemonMetrics {
    fn record_plugin_timeout(&self, plugin: &str) {
        self.plugin_timeouts_total
            .get_or_create(&PluginLabels {
                plugin: plugin.to_string(),
            })
            .inc();
    }

    fn record_session_release(&self, plugin: &str) {
        self.session_releases_total
            .get_or_create(&PluginLabels {
                plugin: plugin.to_string(),
            })
            .inc();
    }

    fn observe_plugin_duration(&self, plugin: &str, seconds: f64) {
        self.plugin_duration_seconds
            .get_or_create(&PluginLabels {
                plugin: plugin.to_string(),
            })
            .observe(seconds);
    }
}

impl EventMetrics for DaemonMetrics {
    fn record_conntrack_event(&self, kind: &str) {
        self.conntrack_events_total
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    fn record_netlogger_event(&self) {
        self.netlogger_events_total.inc();
    }

    fn record_event_dropped(&self, reason: &str) {
        self.events_dropped_total
            .get_or_create(&ReasonLabels {
                reason: reason.to_string(),
            })
            .inc();
    }
}

impl ErrorMetrics for DaemonMetrics {
    fn record_error(&self, reason: &str) {
        self.errors_total
            .get_or_create(&ReasonLabels {
                reason: reason.to_string(),
            })
            .inc();
    }
}
