//! Secondary port for recording operational metrics.
//!
//! Split into sub-traits per concern with no-op defaults, so call sites
//! depend only on what they record and tests can implement a single
//! method. `MetricsPort` bundles them for `Arc<dyn MetricsPort>` sharing.

/// Hot-path packet accounting.
pub trait PacketMetrics {
    fn record_packet(&self, direction: &str, verdict: &str) {
        let _ = (direction, verdict);
    }

    fn record_packet_bytes(&self, family: &str, bytes: u64) {
        let _ = (family, bytes);
    }
}

/// Session table lifecycle.
pub trait SessionMetrics {
    fn session_created(&self) {}

    fn session_removed(&self, reason: &str) {
        let _ = reason;
    }

    fn set_sessions_active(&self, count: u64) {
        let _ = count;
    }

    /// A `bypass_packetd=true` write to the dictionary.
    fn record_bypass_write(&self) {}
}

/// Per-plugin pipeline behaviour.
pub trait PluginMetrics {
    fn record_plugin_timeout(&self, plugin: &str) {
        let _ = plugin;
    }

    fn record_session_release(&self, plugin: &str) {
        let _ = plugin;
    }

    fn observe_plugin_duration(&self, plugin: &str, seconds: f64) {
        let _ = (plugin, seconds);
    }
}

/// Kernel event streams outside the packet path.
pub trait EventMetrics {
    fn record_conntrack_event(&self, kind: &str) {
        let _ = kind;
    }

    fn record_netlogger_event(&self) {}

    fn record_event_dropped(&self, reason: &str) {
        let _ = reason;
    }
}

/// Counted error conditions; rate-limits log volume by moving the count
/// out of the log stream.
pub trait ErrorMetrics {
    fn record_error(&self, reason: &str) {
        let _ = reason;
    }
}

pub trait MetricsPort:
    PacketMetrics + SessionMetrics + PluginMetrics + EventMetrics + ErrorMetrics + Send + Sync
{
}

impl<T> MetricsPort for T where
    T: PacketMetrics + SessionMetrics + PluginMetrics + EventMetrics + ErrorMetrics + Send + Sync
{
}
