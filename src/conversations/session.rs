use chrono::Utc;

use super::model::{Conversation, Message, Role, ANSWER_FAILED_TEXT};
use super::service::ConversationService;
use crate::core::errors::ApiError;
use crate::synthesis::{StreamReconciler, StreamState, SynthesisEvent};

struct PendingAnswer {
    message_id: String,
    reconciler: StreamReconciler,
}

/// One client's view of the conversation store: the currently open
/// conversation plus at most one answer being streamed into it.
pub struct ConversationSession {
    service: ConversationService,
    current: Option<Conversation>,
    answer: Option<PendingAnswer>,
}

impl ConversationSession {
    pub fn new(service: ConversationService) -> Self {
        Self {
            service,
            current: None,
            answer: None,
        }
    }

    pub fn current(&self) -> Option<&Conversation> {
        self.current.as_ref()
    }

    pub fn is_answering(&self) -> bool {
        self.answer.is_some()
    }

    pub async fn start_new(
        &mut self,
        first_message: Option<&str>,
    ) -> Result<&Conversation, ApiError> {
        let conversation = self.service.create(first_message).await?;
        self.answer = None;
        Ok(&*self.current.insert(conversation))
    }

    /// Opens a stored conversation. Unknown ids leave the session unchanged.
    pub async fn load(&mut self, id: &str) -> Result<bool, ApiError> {
        match self.service.get(id).await? {
            Some(conversation) => {
                self.current = Some(conversation);
                self.answer = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Appends to the open conversation. `None` when nothing is open or the
    /// open conversation has since been deleted.
    pub async fn add_message(
        &mut self,
        role: Role,
        content: &str,
    ) -> Result<Option<&Conversation>, ApiError> {
        let Some(id) = self.current.as_ref().map(|c| c.id.clone()) else {
            return Ok(None);
        };

        let message = Message::new(role, content, Utc::now());
        match self.service.append(&id, message).await? {
            Some(updated) => Ok(Some(&*self.current.insert(updated))),
            None => Ok(None),
        }
    }

    pub async fn delete(&mut self, id: &str) -> Result<bool, ApiError> {
        let deleted = self.service.delete(id).await?;
        if deleted && self.current.as_ref().is_some_and(|c| c.id == id) {
            self.current = None;
            self.answer = None;
        }
        Ok(deleted)
    }

    /// Opens an empty assistant message for the next stream. It lives only
    /// in the session until the stream ends.
    pub fn begin_answer(&mut self) -> Result<String, ApiError> {
        let conversation = self
            .current
            .as_mut()
            .ok_or_else(|| ApiError::BadRequest("No conversation is open".to_string()))?;

        if let Some(stale) = self.answer.take() {
            conversation.messages.retain(|m| m.id != stale.message_id);
        }

        let now = Utc::now();
        let message = Message::pending_answer(now);
        let message_id = message.id.clone();
        conversation.messages.push(message);
        self.answer = Some(PendingAnswer {
            message_id: message_id.clone(),
            reconciler: StreamReconciler::new(),
        });
        Ok(message_id)
    }

    /// Folds one NDJSON line into the pending answer.
    pub async fn apply_line(&mut self, line: &str) -> Result<Option<SynthesisEvent>, ApiError> {
        let Some(answer) = self.answer.as_mut() else {
            return Ok(None);
        };
        let Some(event) = answer.reconciler.apply_line(line) else {
            return Ok(None);
        };
        self.settle().await?;
        Ok(Some(event))
    }

    /// Folds one event into the pending answer. Returns true once the answer
    /// has ended and been stored.
    pub async fn apply_event(&mut self, event: &SynthesisEvent) -> Result<bool, ApiError> {
        let Some(answer) = self.answer.as_mut() else {
            return Ok(false);
        };
        if !answer.reconciler.apply(event) {
            return Ok(false);
        }
        self.settle().await
    }

    /// Drops the pending answer without storing anything.
    pub fn abandon_answer(&mut self) {
        let Some(answer) = self.answer.take() else {
            return;
        };
        tracing::debug!(message_id = %answer.message_id, "Answer stream abandoned");
        if let Some(conversation) = self.current.as_mut() {
            conversation.messages.retain(|m| m.id != answer.message_id);
        }
    }

    /// Mirrors the reconciler into the pending message and stores it once
    /// the stream has ended.
    async fn settle(&mut self) -> Result<bool, ApiError> {
        let (Some(answer), Some(conversation)) = (self.answer.as_ref(), self.current.as_mut())
        else {
            return Ok(false);
        };

        let content = match answer.reconciler.state() {
            StreamState::Streaming => {
                conversation.update_message(
                    &answer.message_id,
                    answer.reconciler.text(),
                    false,
                    Utc::now(),
                )?;
                return Ok(false);
            }
            StreamState::Done => answer.reconciler.text().to_string(),
            StreamState::Failed(reason) => {
                tracing::warn!(error = %reason, "Answer stream failed");
                ANSWER_FAILED_TEXT.to_string()
            }
        };

        let message_id = answer.message_id.clone();
        let conversation_id = conversation.id.clone();
        conversation.messages.retain(|m| m.id != message_id);
        self.answer = None;

        let mut message = Message::new(Role::Assistant, content, Utc::now());
        message.id = message_id;
        if let Some(updated) = self.service.append(&conversation_id, message).await? {
            self.current = Some(updated);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::sqlite::tests::test_repository;
    use std::sync::Arc;

    async fn session() -> ConversationSession {
        ConversationSession::new(ConversationService::new(Arc::new(test_repository().await)))
    }

    fn chunk(content: &str, full: &str, position: usize) -> SynthesisEvent {
        SynthesisEvent::Chunk {
            content: content.into(),
            position,
            full_content: Some(full.into()),
        }
    }

    #[tokio::test]
    async fn deleting_the_open_conversation_clears_it() {
        let mut s = session().await;
        let id = s.start_new(Some("What is mysticism?")).await.unwrap().id.clone();

        assert!(s.delete(&id).await.unwrap());
        assert!(s.current().is_none());
        assert!(s.add_message(Role::User, "anyone?").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_another_conversation_keeps_the_open_one() {
        let mut s = session().await;
        let other = s.start_new(Some("first")).await.unwrap().id.clone();
        let open = s.start_new(Some("second")).await.unwrap().id.clone();

        assert!(s.delete(&other).await.unwrap());
        assert_eq!(s.current().map(|c| c.id.as_str()), Some(open.as_str()));
    }

    #[tokio::test]
    async fn load_switches_only_to_known_conversations() {
        let mut s = session().await;
        let first = s.start_new(Some("first")).await.unwrap().id.clone();
        s.add_message(Role::User, "first").await.unwrap();
        let second = s.start_new(None).await.unwrap().id.clone();

        assert!(!s.load("missing").await.unwrap());
        assert_eq!(s.current().unwrap().id, second);

        assert!(s.load(&first).await.unwrap());
        assert_eq!(s.current().unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn streamed_answer_is_stored_on_done() {
        let mut s = session().await;
        let id = s.start_new(Some("What is mysticism?")).await.unwrap().id.clone();
        s.add_message(Role::User, "What is mysticism?").await.unwrap();
        let message_id = s.begin_answer().unwrap();

        assert!(!s.apply_event(&chunk("Mystic", "Mystic", 0)).await.unwrap());
        assert_eq!(s.current().unwrap().messages[1].content, "Mystic");
        assert!(!s.current().unwrap().messages[1].complete);

        let done = SynthesisEvent::Done {
            content: "Mysticism is direct experience.".into(),
        };
        assert!(s.apply_event(&done).await.unwrap());
        assert!(!s.is_answering());

        let stored = s.current().unwrap();
        assert_eq!(stored.messages.len(), 2);
        assert_eq!(stored.messages[1].id, message_id);
        assert_eq!(stored.messages[1].content, "Mysticism is direct experience.");
        assert!(stored.messages[1].complete);

        assert!(s.load(&id).await.unwrap());
        assert_eq!(s.current().unwrap().messages[1].content, "Mysticism is direct experience.");
    }

    #[tokio::test]
    async fn failed_stream_stores_the_apology() {
        let mut s = session().await;
        s.start_new(Some("q")).await.unwrap();
        s.add_message(Role::User, "q").await.unwrap();
        s.begin_answer().unwrap();

        s.apply_line(r#"{"type":"chunk","content":"par","position":0,"fullContent":"par"}"#)
            .await
            .unwrap();
        s.apply_line("not json").await.unwrap();
        let event = s
            .apply_line(r#"{"type":"error","error":"Stream idle timeout"}"#)
            .await
            .unwrap();

        assert!(matches!(event, Some(SynthesisEvent::Error { .. })));
        let answer = &s.current().unwrap().messages[1];
        assert_eq!(answer.content, ANSWER_FAILED_TEXT);
        assert!(answer.complete);
    }

    #[tokio::test]
    async fn abandoned_answer_leaves_no_trace() {
        let mut s = session().await;
        let id = s.start_new(Some("q")).await.unwrap().id.clone();
        s.add_message(Role::User, "q").await.unwrap();
        s.begin_answer().unwrap();
        s.apply_event(&chunk("half", "half", 0)).await.unwrap();

        s.abandon_answer();

        assert_eq!(s.current().unwrap().messages.len(), 1);
        assert!(s.load(&id).await.unwrap());
        assert_eq!(s.current().unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn begin_answer_needs_an_open_conversation() {
        let mut s = session().await;
        assert!(matches!(s.begin_answer(), Err(ApiError::BadRequest(_))));
    }
}
