use std::sync::Arc;
use std::time::Duration;

use crate::core::errors::ApiError;
use crate::core::retry::with_timeout_retry;
use crate::llm::{LlmProvider, Usage};

/// Turns text into a single embedding vector via the configured model.
#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn LlmProvider>,
    model: String,
    timeout: Duration,
    retries: u32,
}

impl EmbeddingClient {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        timeout: Duration,
        retries: u32,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout,
            retries,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<(Vec<f32>, Option<Usage>), ApiError> {
        let inputs = [text.to_string()];
        let provider = &self.provider;
        let model = self.model.as_str();
        let inputs = &inputs[..];

        let embeddings = with_timeout_retry("embedding", self.timeout, self.retries, move || {
            provider.embed(inputs, model)
        })
        .await?;

        let vector = embeddings
            .vectors
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::upstream("embedding response contained no vector"))?;
        Ok((vector, embeddings.usage))
    }

    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, ApiError> {
        self.embed(query).await.map(|(vector, _)| vector)
    }
}
