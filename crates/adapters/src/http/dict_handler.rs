use std::sync::Arc;

use axum::extract::State;

use super::state::AppState;

/// Plain-text dump of every dictionary entry, one per line.
pub async fn dump_dict(State(state): State<Arc<AppState>>) -> String {
    state.dict.dump()
}
