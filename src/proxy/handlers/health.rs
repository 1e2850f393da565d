use axum::{extract::State, http::Uri, Json};
use serde_json::{json, Value};

use crate::proxy::error::ProxyError;
use crate::proxy::state::ProxyState;

/// GET /health
///
/// Idle conversations are dropped first so the count is current.
pub async fn health_handler(State(state): State<ProxyState>) -> Json<Value> {
    let evicted = state.sessions.evict_expired();
    if evicted > 0 {
        tracing::debug!(evicted, "Evicted idle conversations");
    }
    Json(json!({
        "status": "ok",
        "sessions": state.sessions.len(),
    }))
}

/// Any route the bridge does not serve
pub async fn not_found_handler(uri: Uri) -> ProxyError {
    ProxyError::NotFound(format!("No route for {}", uri.path()))
}
