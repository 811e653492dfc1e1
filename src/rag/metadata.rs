use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::store::CorpusStore;
use super::types::{Chunk, ChunkMetadata, Document};
use crate::core::retry::with_timeout_retry;

/// Attaches parent-document metadata to retrieved chunks with one batched
/// lookup. Never fails: missing or unreachable documents degrade to the
/// fallback title.
#[derive(Clone)]
pub struct MetadataJoiner {
    store: Arc<dyn CorpusStore>,
    timeout: Duration,
    retries: u32,
}

impl MetadataJoiner {
    pub fn new(store: Arc<dyn CorpusStore>, timeout: Duration, retries: u32) -> Self {
        Self {
            store,
            timeout,
            retries,
        }
    }

    pub async fn attach_metadata(&self, chunks: Vec<Chunk>) -> Vec<Chunk> {
        let mut seen = HashSet::new();
        let ids: Vec<String> = chunks
            .iter()
            .filter_map(|chunk| chunk.document_id.clone())
            .filter(|id| seen.insert(id.clone()))
            .collect();

        if ids.is_empty() {
            return chunks;
        }

        let store = &self.store;
        let id_slice = &ids[..];
        let documents: HashMap<String, Document> =
            match with_timeout_retry("document lookup", self.timeout, self.retries, move || {
                store.fetch_documents(id_slice)
            })
            .await
            {
                Ok(docs) => docs.into_iter().map(|doc| (doc.id.clone(), doc)).collect(),
                Err(err) => {
                    tracing::warn!(error = %err, documents = ids.len(), "Document metadata lookup failed");
                    HashMap::new()
                }
            };

        chunks
            .into_iter()
            .map(|chunk| join_document(chunk, &documents))
            .collect()
    }
}

fn join_document(mut chunk: Chunk, documents: &HashMap<String, Document>) -> Chunk {
    let Some(document_id) = chunk.document_id.as_deref() else {
        return chunk;
    };

    let extra = std::mem::take(&mut chunk.metadata.extra);
    match documents.get(document_id) {
        Some(document) => {
            chunk.metadata = ChunkMetadata {
                extra,
                ..ChunkMetadata::from_document(document)
            };
            chunk.document = Some(document.clone());
        }
        None => {
            tracing::debug!(document_id, chunk_id = %chunk.id, "No parent document for chunk");
            chunk.metadata = ChunkMetadata {
                extra,
                ..ChunkMetadata::default()
            };
            chunk.document = None;
        }
    }
    chunk
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ApiError;
    use crate::rag::types::{SearchFilters, UNKNOWN_DOCUMENT};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        documents: Vec<Document>,
        fail: bool,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl CorpusStore for CountingStore {
        async fn lexical_candidates(
            &self,
            _query: &str,
            _limit: usize,
            _filters: &SearchFilters,
        ) -> Result<Vec<String>, ApiError> {
            Ok(Vec::new())
        }

        async fn vector_search(
            &self,
            _embedding: &[f32],
            _limit: usize,
            _filters: &SearchFilters,
        ) -> Result<Vec<Chunk>, ApiError> {
            Ok(Vec::new())
        }

        async fn fetch_documents(&self, ids: &[String]) -> Result<Vec<Document>, ApiError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ApiError::internal("database is locked"));
            }
            Ok(self
                .documents
                .iter()
                .filter(|doc| ids.contains(&doc.id))
                .cloned()
                .collect())
        }
    }

    fn joiner(store: Arc<CountingStore>) -> MetadataJoiner {
        MetadataJoiner::new(store, Duration::from_secs(1), 1)
    }

    fn chunk(id: &str, doc: Option<&str>) -> Chunk {
        Chunk::new(id, doc.map(str::to_string), "text")
    }

    #[tokio::test]
    async fn one_lookup_for_all_distinct_documents() {
        let mut mysticism = Document::new("a", "Mysticism");
        mysticism.creator = Some("Evelyn Underhill".into());
        mysticism.filename = Some("mysticism.pdf".into());
        let store = Arc::new(CountingStore {
            documents: vec![mysticism],
            fail: false,
            lookups: AtomicUsize::new(0),
        });

        let chunks = joiner(store.clone())
            .attach_metadata(vec![
                chunk("c1", Some("a")),
                chunk("c2", Some("a")),
                chunk("c3", Some("gone")),
                chunk("c4", None),
            ])
            .await;

        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(chunks[0].metadata.title, "Mysticism");
        assert_eq!(chunks[0].metadata.author.as_deref(), Some("Evelyn Underhill"));
        assert_eq!(chunks[0].metadata.source.as_deref(), Some("mysticism.pdf"));
        assert!(chunks[1].document.is_some());
        assert_eq!(chunks[2].metadata.title, UNKNOWN_DOCUMENT);
        assert!(chunks[2].document.is_none());
        assert_eq!(chunks[3].metadata.title, UNKNOWN_DOCUMENT);
    }

    #[tokio::test]
    async fn lookup_failure_degrades_to_fallback_metadata() {
        let store = Arc::new(CountingStore {
            documents: Vec::new(),
            fail: true,
            lookups: AtomicUsize::new(0),
        });
        let mut stale = chunk("c1", Some("a"));
        stale.metadata.title = "Stale".into();
        stale.metadata.author = Some("Someone".into());

        let chunks = joiner(store).attach_metadata(vec![stale]).await;

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.title, UNKNOWN_DOCUMENT);
        assert_eq!(chunks[0].metadata.author, None);
    }

    #[tokio::test]
    async fn chunks_without_documents_skip_the_lookup() {
        let store = Arc::new(CountingStore {
            documents: Vec::new(),
            fail: false,
            lookups: AtomicUsize::new(0),
        });
        let chunks = joiner(store.clone()).attach_metadata(vec![chunk("c1", None)]).await;

        assert_eq!(chunks.len(), 1);
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
    }
}
