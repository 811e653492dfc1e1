use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::ApiJson;
use crate::core::errors::ApiError;
use crate::rag::types::non_blank;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct EmbeddingRequest {
    #[serde(default)]
    pub text: Option<String>,
}

pub async fn embeddings(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<EmbeddingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let text = non_blank(payload.text.as_deref())
        .ok_or_else(|| ApiError::BadRequest("Text parameter is required".to_string()))?;

    let (embedding, usage) = state
        .retriever
        .embedder()
        .embed(text)
        .await
        .map_err(ApiError::with_details)?;

    Ok(Json(json!({
        "embedding": embedding,
        "usage": usage,
    })))
}
