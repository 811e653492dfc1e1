use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{Local, Utc};
use serde::Deserialize;
use serde_json::json;

use super::ApiJson;
use crate::conversations::{group_by_recency, Message, Role};
use crate::core::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub first_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AppendMessageRequest {
    pub role: Role,
    pub content: String,
}

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = state.conversations.list().await?;
    let groups = group_by_recency(conversations.clone(), &Local::now());
    Ok(Json(json!({
        "conversations": conversations,
        "groups": groups,
    })))
}

pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<CreateConversationRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let first_message = payload.and_then(|Json(p)| p.first_message);
    let conversation = state.conversations.create(first_message.as_deref()).await?;
    Ok(Json(json!({ "conversation": conversation })))
}

pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .conversations
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Conversation not found".to_string()))?;
    Ok(Json(json!({ "conversation": conversation })))
}

pub async fn append_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<AppendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.content.trim().is_empty() {
        return Err(ApiError::BadRequest("Message content is required".to_string()));
    }

    let message = Message::new(payload.role, payload.content, Utc::now());
    let conversation = state
        .conversations
        .append(&id, message)
        .await?
        .ok_or_else(|| ApiError::NotFound("Conversation not found".to_string()))?;
    Ok(Json(json!({ "conversation": conversation })))
}

pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.active_streams.cancel(&id) {
        tracing::debug!(conversation_id = %id, "Cancelled answer stream of deleted conversation");
    }
    let success = state.conversations.delete(&id).await?;
    Ok(Json(json!({ "success": success })))
}
