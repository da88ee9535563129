use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use super::dict_handler::dump_dict;
use super::session_handler::list_sessions;
use super::state::AppState;
use super::status_handler::{metrics, ping, system_status};
use super::traffic_handler::{get_traffic_control, set_traffic_control};

/// Build the admin REST router.
///
/// The surface is deliberately narrow: session table visibility, the
/// dictionary dump, the global bypass flag, and metrics.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/metrics", get(metrics))
        .route("/status/system", get(system_status))
        .route("/status/sessions", get(list_sessions))
        .route("/status/dict", get(dump_dict))
        .route(
            "/control/traffic",
            get(get_traffic_control).post(set_traffic_control),
        )
        .with_state(state)
}
