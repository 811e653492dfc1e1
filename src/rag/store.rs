//! CorpusStore trait: read side of the pre-indexed book corpus.

use async_trait::async_trait;

use super::types::{Chunk, Document, SearchFilters};
use crate::core::errors::ApiError;

#[async_trait]
pub trait CorpusStore: Send + Sync {
    /// Full-text search; returns up to `limit` chunk ids, best match first.
    async fn lexical_candidates(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<String>, ApiError>;

    /// Nearest neighbours of `embedding`, highest similarity first. Ties keep
    /// index order. Returned chunks carry `similarity_score` and their stored
    /// metadata, but no joined document.
    async fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<Chunk>, ApiError>;

    /// Batched lookup; unknown ids are simply absent from the result.
    async fn fetch_documents(&self, ids: &[String]) -> Result<Vec<Document>, ApiError>;
}
