use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::rag::types::non_blank;
use crate::rag::{extract_sources, SearchFilters};
use crate::state::AppState;
use crate::synthesis::SynthesisOptions;

pub const NO_RESULTS_TEXT: &str = "I couldn't find any information related to your query.";

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(flatten)]
    pub filters: SearchFilters,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = non_blank(params.q.as_deref())
        .map(str::trim)
        .ok_or_else(|| ApiError::BadRequest("Query parameter is required".to_string()))?;

    let retrieval = state
        .retriever
        .retrieve_with_metadata(query, state.settings.retrieval.search_limit, &params.filters)
        .await?;

    if retrieval.chunks.is_empty() {
        tracing::info!(query, "No chunks matched search query");
        return Ok(Json(json!({
            "content": NO_RESULTS_TEXT,
            "sources": [],
        })));
    }

    let sources = extract_sources(&retrieval.chunks);
    let content = match state
        .synthesis
        .complete(query, &retrieval.chunks, SynthesisOptions::default())
        .await
    {
        Ok(completion) => completion.content,
        Err(err) => {
            tracing::warn!(error = %err, "Completion failed after retrieval; answering with sources only");
            fallback_answer(query)
        }
    };

    Ok(Json(json!({
        "content": content,
        "sources": sources,
        "query": query,
    })))
}

fn fallback_answer(query: &str) -> String {
    format!(
        "I found some information about \"{}\", but I'm having trouble generating a comprehensive response. Please try again later.",
        query
    )
}
