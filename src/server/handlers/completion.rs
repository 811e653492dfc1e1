use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::ApiJson;
use crate::core::errors::ApiError;
use crate::rag::types::non_blank;
use crate::rag::{Chunk, ContextItem};
use crate::state::AppState;
use crate::synthesis::SynthesisOptions;

#[derive(Debug, Default, Deserialize)]
pub struct CompletionRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub context: Option<Vec<ContextItem>>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

pub async fn completion(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<CompletionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(query), Some(context)) = (non_blank(payload.query.as_deref()), payload.context)
    else {
        return Err(ApiError::BadRequest(
            "Query and context parameters are required".to_string(),
        ));
    };

    let chunks = normalize_context(context);
    let options = SynthesisOptions {
        temperature: payload.temperature,
        max_tokens: payload.max_tokens,
        model: payload.model.filter(|m| !m.trim().is_empty()),
    };

    let completion = state
        .synthesis
        .complete(query, &chunks, options)
        .await
        .map_err(ApiError::with_details)?;

    Ok(Json(json!({
        "content": completion.content,
        "usage": completion.usage,
    })))
}

pub(crate) fn normalize_context(items: Vec<ContextItem>) -> Vec<Chunk> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| item.into_chunk(index))
        .collect()
}
