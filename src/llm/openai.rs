use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::{LlmProvider, TokenStream};
use super::types::{ChatRequest, Completion, Embeddings, Usage};
use crate::core::config::LlmConfig;
use crate::core::errors::ApiError;

/// Client for any server speaking the OpenAI `/v1` chat and embeddings API.
#[derive(Clone)]
pub struct OpenAiProvider {
    base_url: String,
    api_key: Option<String>,
    request_timeout: Duration,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, ApiError> {
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(ApiError::internal)?;

        if config.api_key.is_none() {
            tracing::warn!("No API key configured for {}", config.base_url);
        }

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_timeout,
            client,
        })
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let builder = self.client.post(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn chat_body(request: &ChatRequest, model_id: &str, stream: bool) -> Value {
        let mut body = json!({
            "model": model_id,
            "messages": request.messages,
            "stream": stream,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(t) = request.max_tokens {
                obj.insert("max_tokens".to_string(), json!(t));
            }
        }
        body
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<Completion, ApiError> {
        let body = Self::chat_body(&request, model_id, false);
        let res = self
            .post("/v1/chat/completions")
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        let res = ensure_success(res, "chat completion").await?;

        let payload: ChatCompletionResponse = res.json().await.map_err(map_transport_error)?;
        let content = payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        Ok(Completion {
            content,
            usage: payload.usage,
        })
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        model_id: &str,
    ) -> Result<TokenStream, ApiError> {
        let body = Self::chat_body(&request, model_id, true);
        let send = self.post("/v1/chat/completions").json(&body).send();

        // Only connection setup is bounded here; idle gaps are policed by the consumer.
        let res = tokio::time::timeout(self.request_timeout, send)
            .await
            .map_err(|_| ApiError::Timeout("chat stream did not start in time".to_string()))?
            .map_err(map_transport_error)?;
        let res = ensure_success(res, "chat stream").await?;

        let (tx, rx) = mpsc::channel(32);
        let lines = stream_lines(res.bytes_stream());

        tokio::spawn(async move {
            futures_util::pin_mut!(lines);
            while let Some(line) = lines.next().await {
                let delta = match line {
                    Ok(line) => match parse_sse_line(&line) {
                        SseLine::Delta(content) => content,
                        SseLine::Done => return,
                        SseLine::Skip => continue,
                    },
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };
                if tx.send(Ok(delta)).await.is_err() {
                    tracing::debug!("Stream consumer went away; dropping upstream response");
                    return;
                }
            }
        });

        Ok(rx)
    }

    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Embeddings, ApiError> {
        let body = json!({
            "model": model_id,
            "input": inputs,
        });

        let res = self
            .post("/v1/embeddings")
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        let res = ensure_success(res, "embedding").await?;

        let mut payload: EmbeddingResponse = res.json().await.map_err(map_transport_error)?;
        payload.data.sort_by_key(|item| item.index);
        if payload.data.len() != inputs.len() {
            return Err(ApiError::upstream(format!(
                "embedding response had {} vectors for {} inputs",
                payload.data.len(),
                inputs.len()
            )));
        }

        Ok(Embeddings {
            vectors: payload.data.into_iter().map(|item| item.embedding).collect(),
            usage: payload.usage,
        })
    }
}

fn map_transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout(err.to_string())
    } else {
        ApiError::upstream(err)
    }
}

async fn ensure_success(res: Response, operation: &str) -> Result<Response, ApiError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }

    let text = res.text().await.unwrap_or_default();
    let details = serde_json::from_str::<Value>(&text).unwrap_or_else(|_| json!({ "body": text }));
    let message = details["error"]["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} request failed with status {}", operation, status));

    tracing::warn!(%status, operation, "Upstream LLM request failed");
    Err(ApiError::upstream_with_details(
        message,
        json!({ "status": status.as_u16(), "response": details }),
    ))
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
            Some(content) if !content.is_empty() => SseLine::Delta(content),
            _ => SseLine::Skip,
        },
        Err(err) => {
            tracing::warn!(error = %err, "Skipping malformed stream chunk");
            SseLine::Skip
        }
    }
}

/// Re-chunks a byte stream into complete lines. Bytes are buffered until a
/// newline so multi-byte characters split across reads decode intact.
fn stream_lines<S, B, E>(byte_stream: S) -> impl Stream<Item = Result<String, ApiError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    futures_util::stream::unfold(
        (Box::pin(byte_stream), Vec::<u8>::new(), false),
        |(mut stream, mut buffer, finished)| async move {
            loop {
                if let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let rest = buffer.split_off(pos + 1);
                    let line = String::from_utf8_lossy(&buffer).trim_end().to_string();
                    buffer = rest;
                    if !line.is_empty() {
                        return Some((Ok(line), (stream, buffer, finished)));
                    }
                    continue;
                }

                if finished {
                    return None;
                }

                match stream.next().await {
                    Some(Ok(bytes)) => buffer.extend_from_slice(bytes.as_ref()),
                    Some(Err(err)) => {
                        let err = ApiError::upstream(format!("stream read error: {}", err));
                        return Some((Err(err), (stream, Vec::new(), true)));
                    }
                    None => {
                        let remaining = std::mem::take(&mut buffer);
                        let line = String::from_utf8_lossy(&remaining).trim().to_string();
                        if line.is_empty() {
                            return None;
                        }
                        return Some((Ok(line), (stream, buffer, true)));
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[test]
    fn parses_content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Mystic"}}]}"#;
        assert_eq!(parse_sse_line(line), SseLine::Delta("Mystic".to_string()));
    }

    #[test]
    fn done_marker_ends_stream() {
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line("data:[DONE]"), SseLine::Done);
    }

    #[test]
    fn role_only_comment_and_malformed_lines_are_skipped() {
        let role_only = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_line(role_only), SseLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(parse_sse_line("data: {not json"), SseLine::Skip);
    }

    #[tokio::test]
    async fn stream_lines_joins_partial_reads() {
        let parts: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"data: one\nda".to_vec()),
            Ok(b"ta: two\n\n".to_vec()),
            Ok(b"data: three".to_vec()),
        ];
        let lines: Vec<String> = stream_lines(stream::iter(parts))
            .map(|line| line.unwrap())
            .collect()
            .await;

        assert_eq!(lines, vec!["data: one", "data: two", "data: three"]);
    }

    #[tokio::test]
    async fn stream_lines_keeps_split_multibyte_characters() {
        let word = "mystique\u{e9}\n".as_bytes().to_vec();
        let (head, tail) = word.split_at(word.len() - 2);
        let parts: Vec<Result<Vec<u8>, std::io::Error>> = vec![Ok(head.to_vec()), Ok(tail.to_vec())];

        let lines: Vec<String> = stream_lines(stream::iter(parts))
            .map(|line| line.unwrap())
            .collect()
            .await;

        assert_eq!(lines, vec!["mystique\u{e9}"]);
    }

    #[tokio::test]
    async fn stream_lines_surfaces_read_errors_once() {
        let parts: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"data: one\n".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::Other, "reset")),
            Ok(b"data: never\n".to_vec()),
        ];
        let items: Vec<Result<String, ApiError>> = stream_lines(stream::iter(parts)).collect().await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    #[test]
    fn chat_body_includes_optional_sampling_fields() {
        let request = ChatRequest::new(vec![crate::llm::ChatMessage::user("hi")])
            .with_temperature(Some(0.1))
            .with_max_tokens(Some(2000));
        let body = OpenAiProvider::chat_body(&request, "gpt-4o", true);

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 2000);
        assert!(body["temperature"].as_f64().is_some());
        assert_eq!(body["messages"][0]["role"], "user");
    }
}
