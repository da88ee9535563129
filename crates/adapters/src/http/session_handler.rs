use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use super::state::AppState;

// ── Response DTOs ─────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SessionResponse {
    pub session_id: u64,
    pub conntrack_id: u32,
    pub protocol: String,
    pub client_address: String,
    pub client_port: u16,
    pub server_address: String,
    pub server_port: u16,
    pub family: String,
    pub packets: u64,
    pub bytes: u64,
    pub client_interface_id: u8,
    pub client_interface_type: u8,
    pub server_interface_id: u8,
    pub server_interface_type: u8,
    pub conntrack_confirmed: bool,
    pub subscribers: usize,
    pub age_secs: u64,
    pub idle_secs: u64,
}

// ── Query params ─────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    1000
}

// ── Handlers ──────────────────────────────────────────────────────

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<SessionResponse>> {
    let mut sessions = state.sessions.snapshot();
    sessions.sort_by_key(|s| s.session_id());
    let result = sessions
        .into_iter()
        .take(query.limit)
        .map(|s| {
            let tuple = s.client_side_tuple();
            let (client_if, client_if_type) = s.client_interface();
            let (server_if, server_if_type) = s.server_interface();
            SessionResponse {
                session_id: s.session_id(),
                conntrack_id: s.conntrack_id(),
                protocol: tuple.protocol.to_string(),
                client_address: tuple.client_address.to_string(),
                client_port: tuple.client_port,
                server_address: tuple.server_address.to_string(),
                server_port: tuple.server_port,
                family: s.family().to_string(),
                packets: s.packet_count(),
                bytes: s.byte_count(),
                client_interface_id: client_if,
                client_interface_type: client_if_type,
                server_interface_id: server_if,
                server_interface_type: server_if_type,
                conntrack_confirmed: s.conntrack_confirmed(),
                subscribers: s.subscription_count(),
                age_secs: s.age().as_secs(),
                idle_secs: s.idle().as_secs(),
            }
        })
        .collect();
    Json(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limit_is_1000() {
        assert_eq!(default_limit(), 1000);
    }
}
