use std::sync::Arc;
use std::time::Duration;

use crate::conversations::{
    ConversationRepository, ConversationService, SqliteConversationRepository,
};
use crate::core::config::{AppConfig, AppPaths, ConfigService};
use crate::llm::{LlmProvider, OpenAiProvider};
use crate::rag::{CorpusStore, EmbeddingClient, HybridRetriever, SqliteCorpusStore};
use crate::synthesis::{ActiveStreams, SynthesisService};

pub mod error;

use error::InitializationError;

/// Application state shared across all routes.
///
/// Every service is built once here and handed to handlers through axum's
/// `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub settings: AppConfig,
    pub retriever: HybridRetriever,
    pub synthesis: SynthesisService,
    pub conversations: ConversationService,
    pub active_streams: Arc<ActiveStreams>,
}

impl AppState {
    /// Loads configuration, opens both SQLite stores and connects the
    /// OpenAI-compatible provider.
    pub async fn initialize() -> Result<Arc<Self>, InitializationError> {
        let paths = Arc::new(AppPaths::new());
        let config = ConfigService::new(paths.clone());
        let settings = config
            .load_app_config()
            .map_err(|e| InitializationError::Config(e.into()))?;

        let corpus = Arc::new(
            SqliteCorpusStore::with_path(paths.corpus_db_path.clone())
                .await
                .map_err(|e| InitializationError::Corpus(e.into()))?,
        );

        let conversations = Arc::new(
            SqliteConversationRepository::new(paths.conversations_db_path.clone())
                .await
                .map_err(|e| InitializationError::Conversations(e.into()))?,
        );

        let provider = Arc::new(
            OpenAiProvider::new(&settings.llm).map_err(|e| InitializationError::Llm(e.into()))?,
        );
        if settings.llm.api_key.is_none() {
            tracing::warn!("No LLM API key configured; upstream calls will be rejected");
        }

        Ok(Arc::new(Self::from_parts(
            paths,
            settings,
            corpus,
            conversations,
            provider,
        )))
    }

    /// Wires services from already-open stores and a provider.
    pub fn from_parts(
        paths: Arc<AppPaths>,
        settings: AppConfig,
        corpus: Arc<dyn CorpusStore>,
        conversations: Arc<dyn ConversationRepository>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        let embedder = EmbeddingClient::new(
            provider.clone(),
            settings.llm.embedding_model.clone(),
            Duration::from_secs(settings.retrieval.upstream_timeout_secs),
            settings.retrieval.timeout_retries,
        );
        let retriever = HybridRetriever::new(corpus, embedder, &settings.retrieval);
        let synthesis =
            SynthesisService::new(provider, &settings.llm, settings.synthesis.clone());

        Self {
            paths,
            retriever,
            synthesis,
            conversations: ConversationService::new(conversations),
            active_streams: Arc::new(ActiveStreams::new()),
            settings,
        }
    }
}
