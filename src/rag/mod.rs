//! Retrieval over the pre-indexed corpus.
//!
//! - `HybridRetriever`: lexical candidates intersected with a vector ranking
//! - `MetadataJoiner`: batched parent-document lookup for retrieved chunks
//! - `extract_sources`: order-stable, per-document attribution list

pub mod embedding;
pub mod metadata;
pub mod retrieval;
pub mod sources;
pub mod sqlite;
pub mod store;
pub mod types;

pub use embedding::EmbeddingClient;
pub use metadata::MetadataJoiner;
pub use retrieval::{HybridRetriever, Retrieval, RetrievalMode};
pub use sources::extract_sources;
pub use sqlite::SqliteCorpusStore;
pub use store::CorpusStore;
pub use types::{Chunk, ChunkMetadata, ContextItem, Document, SearchFilters, Source, UNKNOWN_DOCUMENT};
