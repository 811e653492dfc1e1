use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{ChatRequest, Completion, Embeddings};
use crate::core::errors::ApiError;

/// Receiving half of a streamed completion. Each item is one content delta;
/// the channel closes when the upstream stream ends.
pub type TokenStream = mpsc::Receiver<Result<String, ApiError>>;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// provider name, used in logs
    fn name(&self) -> &str;

    /// chat completion (non-streaming)
    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<Completion, ApiError>;

    /// chat completion (streaming). Dropping the receiver stops the upstream read.
    async fn stream_chat(
        &self,
        request: ChatRequest,
        model_id: &str,
    ) -> Result<TokenStream, ApiError>;

    /// generate embeddings, one vector per input in input order
    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Embeddings, ApiError>;
}
