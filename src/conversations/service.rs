use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use super::grouping::{group_by_recency, ConversationGroups};
use super::model::{Conversation, ConversationListItem, Message};
use super::repository::ConversationRepository;
use crate::core::errors::ApiError;

#[derive(Clone)]
pub struct ConversationService {
    repo: Arc<dyn ConversationRepository>,
}

impl ConversationService {
    pub fn new(repo: Arc<dyn ConversationRepository>) -> Self {
        Self { repo }
    }

    /// Creates and stores an empty conversation titled after `first_message`.
    /// The message itself is recorded when it is sent.
    pub async fn create(&self, first_message: Option<&str>) -> Result<Conversation, ApiError> {
        let conversation = Conversation::new(first_message.unwrap_or_default(), Utc::now());
        self.repo.put(&conversation).await?;
        tracing::debug!(conversation_id = %conversation.id, "Created conversation");
        Ok(conversation)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Conversation>, ApiError> {
        self.repo.get(id).await
    }

    /// Appends to a stored conversation. `None` when the id is unknown.
    pub async fn append(
        &self,
        id: &str,
        message: Message,
    ) -> Result<Option<Conversation>, ApiError> {
        let Some(mut conversation) = self.repo.get(id).await? else {
            return Ok(None);
        };
        conversation.append(message, Utc::now());
        self.repo.put(&conversation).await?;
        Ok(Some(conversation))
    }

    pub async fn delete(&self, id: &str) -> Result<bool, ApiError> {
        let deleted = self.repo.delete(id).await?;
        if deleted {
            tracing::debug!(conversation_id = id, "Deleted conversation");
        }
        Ok(deleted)
    }

    /// List view, most recently updated first.
    pub async fn list(&self) -> Result<Vec<ConversationListItem>, ApiError> {
        let mut items: Vec<ConversationListItem> = self
            .repo
            .list()
            .await?
            .iter()
            .map(Conversation::list_item)
            .collect();
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(items)
    }

    pub async fn grouped<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
    ) -> Result<ConversationGroups, ApiError> {
        Ok(group_by_recency(self.list().await?, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::model::{Role, NEW_CONVERSATION_TITLE};
    use crate::conversations::sqlite::tests::test_repository;

    async fn service() -> ConversationService {
        ConversationService::new(Arc::new(test_repository().await))
    }

    #[tokio::test]
    async fn create_with_first_message_only_sets_the_title() {
        let svc = service().await;
        let conv = svc.create(Some("What is mysticism?")).await.unwrap();

        assert_eq!(conv.title, "What is mysticism?");
        assert!(conv.messages.is_empty());

        let stored = svc.get(&conv.id).await.unwrap().unwrap();
        assert_eq!(stored, conv);
    }

    #[tokio::test]
    async fn create_without_message_starts_empty() {
        let svc = service().await;
        for first in [None, Some("   ")] {
            let conv = svc.create(first).await.unwrap();
            assert_eq!(conv.title, NEW_CONVERSATION_TITLE);
            assert!(conv.messages.is_empty());
        }
    }

    #[tokio::test]
    async fn append_to_unknown_conversation_is_none() {
        let svc = service().await;
        let message = Message::new(Role::User, "hello", Utc::now());
        assert!(svc.append("missing", message).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn first_user_append_names_an_untitled_conversation() {
        let svc = service().await;
        let conv = svc.create(None).await.unwrap();

        let updated = svc
            .append(&conv.id, Message::new(Role::User, "Tell me about gnosis", Utc::now()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "Tell me about gnosis");
        assert!(updated.updated_at >= conv.updated_at);
    }

    #[tokio::test]
    async fn list_puts_recent_activity_first() {
        let svc = service().await;
        let first = svc.create(Some("first")).await.unwrap();
        let second = svc.create(Some("second")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        svc.append(&first.id, Message::new(Role::Assistant, "reply", Utc::now()))
            .await
            .unwrap();

        let items = svc.list().await.unwrap();
        assert_eq!(items[0].id, first.id);
        assert_eq!(items[0].preview, "reply...");
        assert_eq!(items[1].id, second.id);

        let groups = svc.grouped(&Utc::now()).await.unwrap();
        assert_eq!(groups.today.len(), 2);
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let svc = service().await;
        let conv = svc.create(Some("bye")).await.unwrap();
        assert!(svc.delete(&conv.id).await.unwrap());
        assert!(!svc.delete(&conv.id).await.unwrap());
        assert!(svc.get(&conv.id).await.unwrap().is_none());
    }
}
