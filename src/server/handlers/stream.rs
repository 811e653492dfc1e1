use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::completion::normalize_context;
use super::ApiJson;
use crate::conversations::{Conversation, ConversationSession, Role};
use crate::core::errors::ApiError;
use crate::llm::ChatMessage;
use crate::rag::types::non_blank;
use crate::rag::{ContextItem, SearchFilters};
use crate::state::AppState;
use crate::synthesis::{SynthesisEvent, SynthesisOptions};

#[derive(Debug, Default, Deserialize)]
pub struct StreamRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub context: Option<Vec<ContextItem>>,
    #[serde(default)]
    pub conversation_history: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Streams a grounded answer as NDJSON. Without explicit `context` the
/// passages are retrieved here. With a `conversation_id` the question and
/// the finished answer are stored in that conversation, and any answer still
/// streaming into it is aborted before the conversation is read.
pub async fn completion_stream(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<StreamRequest>,
) -> Result<Response, ApiError> {
    let query = non_blank(payload.query.as_deref())
        .map(str::trim)
        .ok_or_else(|| ApiError::BadRequest("Query parameter is required".to_string()))?
        .to_string();

    let context = match payload.context {
        Some(items) => normalize_context(items),
        None => {
            state
                .retriever
                .retrieve_with_metadata(
                    &query,
                    state.settings.retrieval.stream_context_limit,
                    &SearchFilters::default(),
                )
                .await?
                .chunks
        }
    };

    let conversation_id = payload
        .conversation_id
        .filter(|id| !id.trim().is_empty());
    let mut session = match conversation_id.as_deref() {
        Some(id) => {
            if state.active_streams.cancel(id) {
                tracing::info!(conversation_id = id, "Superseding in-flight answer stream");
            }
            let mut session = ConversationSession::new(state.conversations.clone());
            if !session.load(id).await? {
                return Err(ApiError::NotFound(format!("Conversation {} not found", id)));
            }
            Some(session)
        }
        None => None,
    };

    let history = match (payload.conversation_history, session.as_ref()) {
        (Some(history), _) => history,
        (None, Some(session)) => session
            .current()
            .map(Conversation::chat_history)
            .unwrap_or_default(),
        (None, None) => Vec::new(),
    };

    if let Some(session) = session.as_mut() {
        session.add_message(Role::User, &query).await?;
        session.begin_answer()?;
    }

    let options = SynthesisOptions {
        temperature: payload.temperature,
        max_tokens: payload.max_tokens,
        model: None,
    };
    let events = state.synthesis.synthesize(&query, &context, &history, options);

    let (body_tx, body_rx) = mpsc::channel::<Result<Bytes, Infallible>>(32);
    let forwarder = tokio::spawn(forward_events(events, body_tx, session));

    if let Some(key) = conversation_id {
        let ticket = state.active_streams.register(&key, forwarder.abort_handle());
        let registry = state.active_streams.clone();
        tokio::spawn(async move {
            let _ = forwarder.await;
            registry.finish(&key, ticket);
        });
    }

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        ndjson_body(body_rx),
    )
        .into_response())
}

/// Writes each event as one line and folds it into the session, if any.
/// Returns when the stream ends or the client goes away; either way the
/// event receiver is dropped, which stops the model stream.
async fn forward_events(
    mut events: mpsc::Receiver<SynthesisEvent>,
    body_tx: mpsc::Sender<Result<Bytes, Infallible>>,
    mut session: Option<ConversationSession>,
) {
    loop {
        let event = tokio::select! {
            _ = body_tx.closed() => {
                tracing::debug!("Client left the answer stream");
                if let Some(session) = session.as_mut() {
                    session.abandon_answer();
                }
                return;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        if let Some(session) = session.as_mut() {
            if let Err(err) = session.apply_event(&event).await {
                tracing::warn!(error = %err, "Failed to store streamed answer");
            }
        }

        if body_tx.send(Ok(Bytes::from(event.to_line()))).await.is_err() {
            tracing::debug!("Client left the answer stream");
            if let Some(session) = session.as_mut() {
                session.abandon_answer();
            }
            return;
        }
    }
}

fn ndjson_body(rx: mpsc::Receiver<Result<Bytes, Infallible>>) -> Body {
    Body::from_stream(futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    }))
}
