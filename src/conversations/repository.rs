use async_trait::async_trait;

use super::model::Conversation;
use crate::core::errors::ApiError;

/// Whole-conversation persistence. Writes replace the stored conversation;
/// the last `put` wins.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Conversation>, ApiError>;

    async fn list(&self) -> Result<Vec<Conversation>, ApiError>;

    async fn put(&self, conversation: &Conversation) -> Result<(), ApiError>;

    /// Returns false when nothing was stored under `id`.
    async fn delete(&self, id: &str) -> Result<bool, ApiError>;
}
