//! Health check and relay statistics.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::room::RoomStats;
use crate::RelayState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    active_rooms: usize,
}

#[derive(Serialize)]
struct StatsResponse {
    active_rooms: usize,
    total_participants: usize,
    rooms: Vec<RoomStats>,
}

/// Health check router.
pub fn router() -> Router<Arc<RelayState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(relay_stats))
}

async fn health_check(State(state): State<Arc<RelayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        active_rooms: state.rooms.active_room_count().await,
    })
}

async fn relay_stats(State(state): State<Arc<RelayState>>) -> Json<StatsResponse> {
    let rooms = state.rooms.stats().await;
    Json(StatsResponse {
        active_rooms: rooms.len(),
        total_participants: rooms.iter().map(|r| r.participants).sum(),
        rooms,
    })
}
