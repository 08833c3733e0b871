//! API endpoints for conversation lifecycle

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::with_database;
use crate::shared_state::UnifiedAppState;
use crate::store::{Conversation, ConversationStatus, Message, NewConversation};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 200;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConversationResponse {
    pub conversation: Conversation,
    pub created: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetailResponse {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: ConversationStatus,
}

#[derive(Debug, Deserialize)]
pub struct ListConversationsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

/// Resume the active conversation for this widget session or open a new one
pub async fn start_conversation(
    State(state): State<UnifiedAppState>,
    Json(payload): Json<NewConversation>,
) -> Result<(StatusCode, Json<StartConversationResponse>), Response> {
    if payload.store_id.trim().is_empty() || payload.session_token.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "storeId and sessionToken are required").into_response());
    }

    let (conversation, created) = with_database(&state, move |db| {
        db.conversations.start_conversation(&payload)
    })
    .await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(StartConversationResponse { conversation, created })))
}

/// A conversation and its messages in creation order
pub async fn get_conversation(
    State(state): State<UnifiedAppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<ConversationDetailResponse>, Response> {
    info!("Fetching conversation: {}", conversation_id);

    let detail = with_database(&state, move |db| {
        let Some(conversation) = db.conversations.get_conversation(&conversation_id)? else {
            return Ok(None);
        };
        let messages = db.conversations.get_messages(&conversation_id)?;
        Ok(Some(ConversationDetailResponse { conversation, messages }))
    })
    .await?;

    detail
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Conversation not found").into_response())
}

pub async fn update_conversation_status(
    State(state): State<UnifiedAppState>,
    Path(conversation_id): Path<String>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<serde_json::Value>, Response> {
    let id = conversation_id.clone();
    let updated = with_database(&state, move |db| {
        db.conversations.update_conversation_status(&id, payload.status)
    })
    .await?;

    if !updated {
        return Err((StatusCode::NOT_FOUND, "Conversation not found").into_response());
    }
    Ok(Json(serde_json::json!({
        "id": conversation_id,
        "status": payload.status,
    })))
}

pub async fn list_store_conversations(
    State(state): State<UnifiedAppState>,
    Path(store_id): Path<String>,
    Query(query): Query<ListConversationsQuery>,
) -> Result<Json<ConversationsResponse>, Response> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<ConversationStatus>()
                .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()).into_response())?,
        ),
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);

    let conversations = with_database(&state, move |db| {
        db.conversations.list_conversations(&store_id, status, limit)
    })
    .await?;

    Ok(Json(ConversationsResponse { conversations }))
}
