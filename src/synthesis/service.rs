use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::events::SynthesisEvent;
use super::prompt::{completion_messages, stream_messages};
use crate::core::config::{LlmConfig, SynthesisConfig};
use crate::core::errors::ApiError;
use crate::llm::{ChatMessage, ChatRequest, Completion, LlmProvider, TokenStream};
use crate::rag::Chunk;

#[derive(Debug, Clone, Default)]
pub struct SynthesisOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Overrides the configured completion model.
    pub model: Option<String>,
}

/// Grounds the LLM in retrieved context and produces answers, either in one
/// shot or as an event stream.
#[derive(Clone)]
pub struct SynthesisService {
    provider: Arc<dyn LlmProvider>,
    chat_model: String,
    completion_model: String,
    defaults: SynthesisConfig,
    idle_timeout: Duration,
}

impl SynthesisService {
    pub fn new(provider: Arc<dyn LlmProvider>, llm: &LlmConfig, defaults: SynthesisConfig) -> Self {
        Self {
            provider,
            chat_model: llm.chat_model.clone(),
            completion_model: llm.completion_model.clone(),
            defaults,
            idle_timeout: Duration::from_secs(llm.stream_idle_timeout_secs),
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub async fn complete(
        &self,
        query: &str,
        context: &[Chunk],
        options: SynthesisOptions,
    ) -> Result<Completion, ApiError> {
        let request = ChatRequest::new(completion_messages(query, context))
            .with_temperature(Some(options.temperature.unwrap_or(self.defaults.temperature)))
            .with_max_tokens(options.max_tokens);
        let model = options.model.unwrap_or_else(|| self.completion_model.clone());

        tracing::info!(
            provider = self.provider.name(),
            model = %model,
            context_items = context.len(),
            "Generating completion"
        );
        self.provider.chat(request, &model).await
    }

    /// Starts a streamed answer. The returned channel yields chunk events and
    /// exactly one terminal event, then closes. Dropping the receiver cancels
    /// the upstream request.
    pub fn synthesize(
        &self,
        query: &str,
        context: &[Chunk],
        history: &[ChatMessage],
        options: SynthesisOptions,
    ) -> mpsc::Receiver<SynthesisEvent> {
        let messages = stream_messages(query, context, history, self.defaults.max_history_turns);
        let request = ChatRequest::new(messages)
            .with_temperature(Some(options.temperature.unwrap_or(self.defaults.temperature)))
            .with_max_tokens(Some(options.max_tokens.unwrap_or(self.defaults.max_tokens)));
        let model = options.model.unwrap_or_else(|| self.chat_model.clone());

        let (tx, rx) = mpsc::channel(32);
        let provider = self.provider.clone();
        let idle_timeout = self.idle_timeout;

        tracing::info!(
            provider = provider.name(),
            model = %model,
            context_items = context.len(),
            history = history.len(),
            "Starting streamed answer"
        );

        tokio::spawn(async move {
            let upstream = tokio::select! {
                _ = tx.closed() => {
                    tracing::debug!("Client left before the model stream opened");
                    return;
                }
                opened = provider.stream_chat(request, &model) => opened,
            };

            match upstream {
                Ok(upstream) => forward_tokens(upstream, &tx, idle_timeout).await,
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to open model stream");
                    let _ = tx.send(SynthesisEvent::Error { error: err.message() }).await;
                }
            }
        });

        rx
    }
}

async fn forward_tokens(
    mut upstream: TokenStream,
    tx: &mpsc::Sender<SynthesisEvent>,
    idle_timeout: Duration,
) {
    let mut full_response = String::new();
    let mut char_count = 0usize;
    let mut deltas = 0usize;

    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                tracing::debug!(deltas, "Client disconnected; abandoning model stream");
                return;
            }
            next = tokio::time::timeout(idle_timeout, upstream.recv()) => next,
        };

        let delta = match next {
            Err(_) => {
                tracing::warn!(deltas, "Model stream idle for {:?}", idle_timeout);
                let error = format!(
                    "The model stopped responding for {} seconds",
                    idle_timeout.as_secs()
                );
                let _ = tx.send(SynthesisEvent::Error { error }).await;
                return;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                tracing::warn!(error = %err, deltas, "Model stream failed");
                let _ = tx.send(SynthesisEvent::Error { error: err.message() }).await;
                return;
            }
            Ok(Some(Ok(delta))) => delta,
        };

        if delta.is_empty() {
            continue;
        }
        deltas += 1;
        let position = char_count;
        char_count += delta.chars().count();
        full_response.push_str(&delta);

        let event = SynthesisEvent::Chunk {
            content: delta,
            position,
            full_content: Some(full_response.clone()),
        };
        if tx.send(event).await.is_err() {
            tracing::debug!(deltas, "Client disconnected; abandoning model stream");
            return;
        }
    }

    tracing::info!(deltas, chars = char_count, "Streamed answer complete");
    let _ = tx
        .send(SynthesisEvent::Done {
            content: full_response.trim().to_string(),
        })
        .await;
}
