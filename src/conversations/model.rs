use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::errors::ApiError;
use crate::llm::ChatMessage;

pub const NEW_CONVERSATION_TITLE: &str = "New conversation";
pub const NO_RESPONSE_PREVIEW: &str = "No response yet";
pub const ANSWER_FAILED_TEXT: &str =
    "Sorry, there was an error generating a response. Please try again.";

const TITLE_MAX_CHARS: usize = 30;
const PREVIEW_MAX_CHARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// False only while an assistant answer is still streaming in.
    pub complete: bool,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: now,
            complete: true,
        }
    }

    /// Empty assistant message that a stream will fill in.
    pub fn pending_answer(now: DateTime<Utc>) -> Self {
        Self {
            complete: false,
            ..Self::new(Role::Assistant, String::new(), now)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(first_message: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: generate_title(first_message),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Appends `message`. The first message, when it is a user message,
    /// also names the conversation.
    pub fn append(&mut self, message: Message, now: DateTime<Utc>) {
        if self.messages.is_empty() && message.role == Role::User {
            self.title = generate_title(&message.content);
        }
        self.messages.push(message);
        self.updated_at = now;
    }

    /// Rewrites a still-streaming message. Completed messages are immutable.
    pub fn update_message(
        &mut self,
        message_id: &str,
        content: &str,
        complete: bool,
        now: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| ApiError::NotFound(format!("Message {} not found", message_id)))?;

        if message.complete {
            return Err(ApiError::BadRequest(format!(
                "Message {} is complete and can no longer change",
                message_id
            )));
        }

        message.content = content.to_string();
        message.complete = complete;
        self.updated_at = now;
        Ok(())
    }

    pub fn preview(&self) -> String {
        match self.messages.iter().find(|m| m.role == Role::Assistant) {
            Some(answer) => {
                let head: String = answer.content.chars().take(PREVIEW_MAX_CHARS).collect();
                format!("{}...", head)
            }
            None => NO_RESPONSE_PREVIEW.to_string(),
        }
    }

    /// Finished turns in chat form, for grounding a follow-up answer.
    pub fn chat_history(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|m| m.complete && !m.content.trim().is_empty())
            .map(|m| match m.role {
                Role::User => ChatMessage::user(m.content.clone()),
                Role::Assistant => ChatMessage::assistant(m.content.clone()),
            })
            .collect()
    }

    pub fn list_item(&self) -> ConversationListItem {
        ConversationListItem {
            id: self.id.clone(),
            title: self.title.clone(),
            preview: self.preview(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationListItem {
    pub id: String,
    pub title: String,
    pub preview: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Collapses whitespace runs and cuts to 30 characters plus an ellipsis.
pub fn generate_title(message: &str) -> String {
    let cleaned = message.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        return NEW_CONVERSATION_TITLE.to_string();
    }
    if cleaned.chars().count() <= TITLE_MAX_CHARS {
        return cleaned;
    }
    let head: String = cleaned.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, hour, 0, 0).unwrap()
    }

    #[test]
    fn title_rules() {
        assert_eq!(generate_title(""), NEW_CONVERSATION_TITLE);
        assert_eq!(generate_title(" \n\t "), NEW_CONVERSATION_TITLE);
        assert_eq!(generate_title("What is mysticism?"), "What is mysticism?");

        let exactly_30 = "a".repeat(30);
        assert_eq!(generate_title(&exactly_30), exactly_30);

        let long = "Tell me about the history of Christian mysticism";
        assert_eq!(generate_title(long), "Tell me about the history of C...");
    }

    #[test]
    fn title_collapses_whitespace_before_truncating() {
        assert_eq!(generate_title("What\n\nis   mysticism?"), "What is mysticism?");
    }

    #[test]
    fn title_counts_characters() {
        let accented = "\u{e9}".repeat(31);
        assert_eq!(generate_title(&accented), format!("{}...", "\u{e9}".repeat(30)));
    }

    #[test]
    fn first_user_message_names_the_conversation_once() {
        let mut conv = Conversation::new("", at(9));
        assert_eq!(conv.title, NEW_CONVERSATION_TITLE);

        conv.append(Message::new(Role::User, "What is mysticism?", at(9)), at(10));
        conv.append(Message::new(Role::User, "And gnosis?", at(10)), at(11));

        assert_eq!(conv.title, "What is mysticism?");
        assert_eq!(conv.updated_at, at(11));
        assert_eq!(conv.created_at, at(9));
    }

    #[test]
    fn sequential_appends_compose() {
        let m1 = Message::new(Role::User, "q", at(9));
        let m2 = Message::new(Role::Assistant, "a", at(9));

        let mut both = Conversation::new("", at(8));
        let mut one_by_one = both.clone();
        for m in [m1.clone(), m2.clone()] {
            both.append(m, at(10));
        }
        one_by_one.append(m1, at(10));
        one_by_one.append(m2, at(10));

        assert_eq!(both, one_by_one);
    }

    #[test]
    fn completed_messages_are_immutable() {
        let mut conv = Conversation::new("", at(9));
        let answer = Message::pending_answer(at(9));
        let answer_id = answer.id.clone();
        conv.append(answer, at(9));

        conv.update_message(&answer_id, "partial", false, at(10)).unwrap();
        conv.update_message(&answer_id, "final", true, at(11)).unwrap();
        let err = conv.update_message(&answer_id, "late", true, at(12)).unwrap_err();

        assert!(matches!(err, ApiError::BadRequest(_)));
        assert_eq!(conv.messages[0].content, "final");
        assert_eq!(conv.updated_at, at(11));
    }

    #[test]
    fn chat_history_skips_pending_and_empty_turns() {
        let mut conv = Conversation::new("", at(9));
        conv.append(Message::new(Role::User, "q1", at(9)), at(9));
        conv.append(Message::new(Role::Assistant, "a1", at(9)), at(9));
        conv.append(Message::new(Role::User, "  ", at(9)), at(9));
        conv.append(Message::pending_answer(at(9)), at(9));

        assert_eq!(
            conv.chat_history(),
            vec![ChatMessage::user("q1"), ChatMessage::assistant("a1")]
        );
    }

    #[test]
    fn preview_uses_first_answer() {
        let mut conv = Conversation::new("", at(9));
        assert_eq!(conv.preview(), NO_RESPONSE_PREVIEW);

        conv.append(Message::new(Role::User, "q", at(9)), at(9));
        conv.append(Message::new(Role::Assistant, "x".repeat(80), at(9)), at(9));
        conv.append(Message::new(Role::Assistant, "second", at(9)), at(9));

        assert_eq!(conv.preview(), format!("{}...", "x".repeat(60)));
        assert_eq!(conv.list_item().preview, conv.preview());
    }
}
