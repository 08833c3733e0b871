//! API module - HTTP and WebSocket handlers for the chat server

pub mod admin_api;
pub mod catalog_api;
pub mod conversation_api;
pub mod ws_api;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::shared_state::UnifiedAppState;
use crate::store::ChatDatabase;

pub use admin_api::{admin_stats, health};
pub use catalog_api::import_catalog;
pub use conversation_api::{get_conversation, list_store_conversations, start_conversation, update_conversation_status};
pub use ws_api::ws_handler;

/// Run a synchronous database call on the blocking pool. Failures are logged
/// and surface to the client as a plain 500.
pub(crate) async fn with_database<T, F>(state: &UnifiedAppState, f: F) -> Result<T, Response>
where
    F: FnOnce(&ChatDatabase) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let database = state.shared_state.database.clone();
    match tokio::task::spawn_blocking(move || f(&database)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            error!("Database error: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response())
        }
        Err(e) => {
            error!("Database task failed: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response())
        }
    }
}
