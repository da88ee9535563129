use crate::secondary::metrics_port::{
    ErrorMetrics, EventMetrics, PacketMetrics, PluginMetrics, SessionMetrics,
};

/// No-op implementation of all metrics sub-traits for use in tests.
///
/// All methods inherit the default no-op implementations.
pub struct NoopMetrics;

impl PacketMetrics for NoopMetrics {}
impl SessionMetrics for NoopMetrics {}
impl PluginMetrics for NoopMetrics {}
impl EventMetrics for NoopMetrics {}
impl ErrorMetrics for NoopMetrics {}
