use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use bellhop_queue::QueueStats;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::app::AppState;

#[derive(Deserialize)]
pub struct StatsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

/// GET /stats?limit=N: queue counters and the next N pending reminders.
pub async fn stats_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<QueueStats>, (StatusCode, Json<Value>)> {
    state
        .monitor
        .stats(query.limit.min(500))
        .map(Json)
        .map_err(super::appointments::reminder_error)
}
