use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe with version and next fire time.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let next_fire_at = state.monitor.next_fire_at().ok().flatten();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "next_fire_at": next_fire_at,
    }))
}
