use std::sync::Arc;
use std::time::Instant;

use application::nfqueue_dispatch::PacketDispatcher;
use domain::conntrack::table::ConntrackTable;
use domain::dict::store::Dictionary;
use domain::session::table::SessionTable;
use infrastructure::metrics::DaemonMetrics;

/// Shared application state for the admin REST server.
///
/// Passed to Axum handlers via `State(Arc<AppState>)`.
pub struct AppState {
    pub metrics: Arc<DaemonMetrics>,
    pub dispatcher: Arc<PacketDispatcher>,
    pub sessions: Arc<SessionTable>,
    pub conntracks: Arc<ConntrackTable>,
    pub dict: Arc<Dictionary>,
    pub start_time: Instant,
    pub version: &'static str,
}

impl AppState {
    pub fn new(
        metrics: Arc<DaemonMetrics>,
        dispatcher: Arc<PacketDispatcher>,
        sessions: Arc<SessionTable>,
        conntracks: Arc<ConntrackTable>,
        dict: Arc<Dictionary>,
    ) -> Self {
        Self {
            metrics,
            dispatcher,
            sessions,
            conntracks,
            dict,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}
