//! Conversation history: the persisted model, recency grouping and the
//! per-client session that streams answers into it.

pub mod grouping;
pub mod model;
pub mod repository;
pub mod service;
pub mod session;
pub mod sqlite;

pub use grouping::{group_by_recency, ConversationGroups};
pub use model::{generate_title, Conversation, ConversationListItem, Message, Role};
pub use repository::ConversationRepository;
pub use service::ConversationService;
pub use session::ConversationSession;
pub use sqlite::SqliteConversationRepository;
