use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use super::state::AppState;

#[derive(Deserialize)]
pub struct TrafficControlRequest {
    pub bypass: bool,
}

#[derive(Serialize)]
pub struct TrafficControlResponse {
    pub bypass: bool,
}

/// Flip the global bypass flag: while set, every queued packet is
/// accepted immediately without touching sessions or plugins.
pub async fn set_traffic_control(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TrafficControlRequest>,
) -> Json<TrafficControlResponse> {
    if request.bypass {
        tracing::info!("setting traffic bypass flag");
    } else {
        tracing::info!("clearing traffic bypass flag");
    }
    state.dispatcher.set_bypass_all(request.bypass);
    Json(TrafficControlResponse {
        bypass: state.dispatcher.bypass_all(),
    })
}

pub async fn get_traffic_control(
    State(state): State<Arc<AppState>>,
) -> Json<TrafficControlResponse> {
    Json(TrafficControlResponse {
        bypass: state.dispatcher.bypass_all(),
    })
}
