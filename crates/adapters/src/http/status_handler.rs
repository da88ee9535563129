use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use super::error::ApiError;
use super::state::AppState;

#[derive(Serialize)]
pub struct PingResponse {
    pub message: &'static str,
}

pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse { message: "pong" })
}

#[derive(Serialize)]
pub struct SystemStatusResponse {
    pub version: &'static str,
    pub uptime_secs: u64,
    pub sessions: usize,
    pub conntracks: usize,
    pub dict_keys: usize,
    pub bypass_all: bool,
}

pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatusResponse> {
    Json(SystemStatusResponse {
        version: state.version,
        uptime_secs: state.start_time.elapsed().as_secs(),
        sessions: state.sessions.len(),
        conntracks: state.conntracks.len(),
        dict_keys: state.dict.key_count(),
        bypass_all: state.dispatcher.bypass_all(),
    })
}

/// Prometheus metrics in the OpenMetrics text format.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<String, ApiError> {
    state.metrics.uptime_seconds
        .set(state.start_time.elapsed().as_secs_f64());
    state.metrics.encode().map_err(|err| ApiError::Internal {
        message: format!("metrics encoding failed: {err}"),
    })
}
