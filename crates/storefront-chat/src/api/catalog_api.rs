//! Catalog import: the commerce platform (or a sync job) pushes a full snapshot per store

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use super::with_database;
use crate::shared_state::UnifiedAppState;
use crate::store::{CatalogImportStats, CatalogSnapshot};

pub async fn import_catalog(
    State(state): State<UnifiedAppState>,
    Path(store_id): Path<String>,
    Json(snapshot): Json<CatalogSnapshot>,
) -> Result<Json<CatalogImportStats>, Response> {
    if store_id.trim().is_empty() || snapshot.name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "store id and name are required").into_response());
    }
    info!(
        "Importing catalog for store {} ({} products)",
        store_id,
        snapshot.products.len()
    );

    let id = store_id.clone();
    let stats = with_database(&state, move |db| db.catalog.import_catalog(&id, &snapshot)).await?;
    state.shared_state.orchestrator.planner().invalidate_store(&store_id);

    Ok(Json(stats))
}
