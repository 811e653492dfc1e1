use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::embedding::EmbeddingClient;
use super::metadata::MetadataJoiner;
use super::store::CorpusStore;
use super::types::{Chunk, SearchFilters};
use crate::core::config::RetrievalConfig;
use crate::core::errors::ApiError;
use crate::core::retry::with_timeout_retry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    Hybrid,
    VectorOnly,
}

#[derive(Debug, Clone)]
pub struct Retrieval {
    pub chunks: Vec<Chunk>,
    pub mode: RetrievalMode,
}

/// Lexical candidate selection plus vector re-ranking over the corpus.
#[derive(Clone)]
pub struct HybridRetriever {
    store: Arc<dyn CorpusStore>,
    embedder: EmbeddingClient,
    joiner: MetadataJoiner,
    candidate_pool_size: usize,
    vector_pool_size: usize,
    timeout: Duration,
    retries: u32,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<dyn CorpusStore>,
        embedder: EmbeddingClient,
        config: &RetrievalConfig,
    ) -> Self {
        let timeout = Duration::from_secs(config.upstream_timeout_secs);
        Self {
            joiner: MetadataJoiner::new(store.clone(), timeout, config.timeout_retries),
            store,
            embedder,
            candidate_pool_size: config.candidate_pool_size,
            vector_pool_size: config.vector_pool_size,
            timeout,
            retries: config.timeout_retries,
        }
    }

    pub fn embedder(&self) -> &EmbeddingClient {
        &self.embedder
    }

    /// Ranked chunks for `query`, at most `limit`, best first, without
    /// parent-document metadata.
    pub async fn retrieve(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Retrieval, ApiError> {
        let (lexical, embedding) = tokio::join!(
            self.lexical_candidates(query, filters),
            self.embedder.embed_query(query)
        );
        let embedding = embedding?;

        let store = &self.store;
        let embedding = embedding.as_slice();
        let pool = self.vector_pool_size.max(limit);
        let ranked = with_timeout_retry("vector search", self.timeout, self.retries, move || {
            store.vector_search(embedding, pool, filters)
        })
        .await?;

        let lexical_ids = match lexical {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(error = %err, "Lexical search failed; using vector ranking only");
                Vec::new()
            }
        };

        let (chunks, mode) = fuse_candidates(ranked, &lexical_ids, limit);
        tracing::info!(
            mode = ?mode,
            lexical = lexical_ids.len(),
            returned = chunks.len(),
            "Retrieved chunks"
        );
        Ok(Retrieval { chunks, mode })
    }

    /// `retrieve` followed by the batched parent-document join.
    pub async fn retrieve_with_metadata(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Retrieval, ApiError> {
        let retrieval = self.retrieve(query, limit, filters).await?;
        Ok(Retrieval {
            chunks: self.joiner.attach_metadata(retrieval.chunks).await,
            mode: retrieval.mode,
        })
    }

    async fn lexical_candidates(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<String>, ApiError> {
        let store = &self.store;
        let pool = self.candidate_pool_size;
        with_timeout_retry("lexical search", self.timeout, self.retries, move || {
            store.lexical_candidates(query, pool, filters)
        })
        .await
    }
}

/// Keeps the vector ranking order, restricted to lexical candidates. Falls
/// back to the plain vector ranking when there are no candidates or none of
/// them made the vector pool.
pub fn fuse_candidates(
    ranked: Vec<Chunk>,
    lexical_ids: &[String],
    limit: usize,
) -> (Vec<Chunk>, RetrievalMode) {
    let candidates: HashSet<&str> = lexical_ids.iter().map(String::as_str).collect();

    if ranked.iter().any(|chunk| candidates.contains(chunk.id.as_str())) {
        let hybrid = ranked
            .into_iter()
            .filter(|chunk| candidates.contains(chunk.id.as_str()))
            .take(limit)
            .collect();
        return (hybrid, RetrievalMode::Hybrid);
    }

    (
        ranked.into_iter().take(limit).collect(),
        RetrievalMode::VectorOnly,
    )
}
