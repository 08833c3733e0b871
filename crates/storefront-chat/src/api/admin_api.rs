//! Health and operational stats

use axum::{extract::State, response::Response, Json};
use serde::Serialize;
use std::sync::atomic::Ordering;

use super::with_database;
use crate::shared_state::UnifiedAppState;
use crate::store::DatabaseStats;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStatsResponse {
    pub uptime_seconds: u64,
    pub active_connections: usize,
    pub total_connections: usize,
    pub messages_received: usize,
    pub malformed_events: usize,
    pub registrations: usize,
    pub joined_conversations: usize,
    pub database: DatabaseStats,
}

pub async fn health(State(state): State<UnifiedAppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.shared_state.uptime_seconds(),
    })
}

pub async fn admin_stats(
    State(state): State<UnifiedAppState>,
) -> Result<Json<AdminStatsResponse>, Response> {
    let database = with_database(&state, |db| db.get_stats()).await?;
    let shared = &state.shared_state;
    let counters = &shared.counters;

    Ok(Json(AdminStatsResponse {
        uptime_seconds: shared.uptime_seconds(),
        active_connections: counters.active_connections.load(Ordering::Relaxed),
        total_connections: counters.total_connections.load(Ordering::Relaxed),
        messages_received: counters.messages_received.load(Ordering::Relaxed),
        malformed_events: counters.malformed_events.load(Ordering::Relaxed),
        registrations: shared.hub.registration_count(),
        joined_conversations: shared.hub.conversation_count(),
        database,
    }))
}
