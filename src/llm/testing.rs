//! Scripted in-process provider for deterministic tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::provider::{LlmProvider, TokenStream};
use super::types::{ChatRequest, Completion, Embeddings, Usage};
use crate::core::errors::ApiError;

#[derive(Debug, Clone)]
pub enum StreamStep {
    Token(&'static str),
    Pause(Duration),
    Fail(&'static str),
    /// Never yields again; used to trip idle timeouts.
    Stall,
}

#[derive(Default)]
pub struct ScriptedProvider {
    embeddings: HashMap<String, Vec<f32>>,
    fallback_embedding: Vec<f32>,
    embed_error: Option<String>,
    completion: Option<String>,
    stream: Vec<StreamStep>,
    pub requests: Mutex<Vec<ChatRequest>>,
    pub upstream_dropped: Arc<AtomicBool>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            fallback_embedding: vec![0.0, 0.0, 1.0],
            completion: Some("scripted answer".to_string()),
            ..Default::default()
        }
    }

    pub fn with_embedding(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.embeddings.insert(text.to_string(), vector);
        self
    }

    pub fn with_embed_error(mut self, message: &str) -> Self {
        self.embed_error = Some(message.to_string());
        self
    }

    pub fn with_completion(mut self, content: Option<&str>) -> Self {
        self.completion = content.map(str::to_string);
        self
    }

    pub fn with_stream(mut self, steps: Vec<StreamStep>) -> Self {
        self.stream = steps;
        self
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().ok().and_then(|reqs| reqs.last().cloned())
    }

    fn record(&self, request: ChatRequest) {
        if let Ok(mut reqs) = self.requests.lock() {
            reqs.push(request);
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: ChatRequest, _model_id: &str) -> Result<Completion, ApiError> {
        self.record(request);
        match &self.completion {
            Some(content) => Ok(Completion {
                content: content.clone(),
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                }),
            }),
            None => Err(ApiError::upstream("completion unavailable")),
        }
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        _model_id: &str,
    ) -> Result<TokenStream, ApiError> {
        self.record(request);
        let (tx, rx) = mpsc::channel(1);
        let steps = self.stream.clone();
        let dropped = self.upstream_dropped.clone();

        tokio::spawn(async move {
            for step in steps {
                match step {
                    StreamStep::Token(text) => {
                        if tx.send(Ok(text.to_string())).await.is_err() {
                            dropped.store(true, Ordering::SeqCst);
                            return;
                        }
                    }
                    StreamStep::Pause(duration) => tokio::time::sleep(duration).await,
                    StreamStep::Fail(message) => {
                        let _ = tx.send(Err(ApiError::upstream(message))).await;
                        return;
                    }
                    StreamStep::Stall => {
                        tx.closed().await;
                        dropped.store(true, Ordering::SeqCst);
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn embed(&self, inputs: &[String], _model_id: &str) -> Result<Embeddings, ApiError> {
        if let Some(message) = &self.embed_error {
            return Err(ApiError::upstream(message));
        }
        Ok(Embeddings {
            vectors: inputs
                .iter()
                .map(|text| {
                    self.embeddings
                        .get(text)
                        .cloned()
                        .unwrap_or_else(|| self.fallback_embedding.clone())
                })
                .collect(),
            usage: Some(Usage {
                prompt_tokens: inputs.len() as u64,
                completion_tokens: 0,
                total_tokens: inputs.len() as u64,
            }),
        })
    }
}
