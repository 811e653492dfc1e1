use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use super::model::{Conversation, Message, Role};
use super::repository::ConversationRepository;
use crate::core::errors::ApiError;

const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone)]
pub struct SqliteConversationRepository {
    pool: SqlitePool,
}

impl SqliteConversationRepository {
    pub async fn new(db_path: PathBuf) -> Result<Self, ApiError> {
        let connect_options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(connect_options)
            .await
            .map_err(ApiError::internal)?;

        let repo = Self { pool };
        repo.init_db().await?;
        Ok(repo)
    }

    async fn init_db(&self) -> Result<(), ApiError> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        if version != SCHEMA_VERSION {
            tracing::info!(
                from = version,
                to = SCHEMA_VERSION,
                "Rebuilding conversation schema"
            );
            self.rebuild_schema().await?;
        }

        Ok(())
    }

    async fn rebuild_schema(&self) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        sqlx::query("DROP TABLE IF EXISTS messages")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        sqlx::query("DROP TABLE IF EXISTS conversations")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query(
            "\
            CREATE TABLE conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "\
            CREATE TABLE messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                role TEXT NOT NULL CHECK(role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                complete INTEGER NOT NULL DEFAULT 1,
                timestamp TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            )",
        )
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX idx_conversations_updated_at ON conversations(updated_at DESC)")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        sqlx::query("CREATE INDEX idx_messages_conversation_seq ON messages(conversation_id, seq)")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        let pragma = format!("PRAGMA user_version = {}", SCHEMA_VERSION);
        sqlx::query(&pragma)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        let rows = sqlx::query(
            "\
            SELECT id, role, content, complete, timestamp
            FROM messages
            WHERE conversation_id = ?1
            ORDER BY seq ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.into_iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ApiError::internal)
    }
}

#[async_trait]
impl ConversationRepository for SqliteConversationRepository {
    async fn get(&self, id: &str) -> Result<Option<Conversation>, ApiError> {
        let row = sqlx::query(
            "SELECT id, title, created_at, updated_at FROM conversations WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut conversation = conversation_from_row(row).map_err(ApiError::internal)?;
        conversation.messages = self.load_messages(id).await?;
        Ok(Some(conversation))
    }

    async fn list(&self) -> Result<Vec<Conversation>, ApiError> {
        let rows = sqlx::query(
            "\
            SELECT id, title, created_at, updated_at
            FROM conversations
            ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut conversations = rows
            .into_iter()
            .map(conversation_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ApiError::internal)?;

        let message_rows = sqlx::query(
            "\
            SELECT conversation_id, id, role, content, complete, timestamp
            FROM messages
            ORDER BY conversation_id, seq ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut by_conversation: HashMap<String, Vec<Message>> = HashMap::new();
        for row in message_rows {
            let conversation_id: String =
                row.try_get("conversation_id").map_err(ApiError::internal)?;
            let message = message_from_row(row).map_err(ApiError::internal)?;
            by_conversation
                .entry(conversation_id)
                .or_default()
                .push(message);
        }

        for conversation in &mut conversations {
            if let Some(messages) = by_conversation.remove(&conversation.id) {
                conversation.messages = messages;
            }
        }
        Ok(conversations)
    }

    async fn put(&self, conversation: &Conversation) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        sqlx::query(
            "\
            INSERT INTO conversations (id, title, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
        )
        .bind(&conversation.id)
        .bind(&conversation.title)
        .bind(format_timestamp(&conversation.created_at))
        .bind(format_timestamp(&conversation.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        replace_messages(&mut tx, conversation).await?;

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(result.rows_affected() > 0)
    }
}

async fn replace_messages(
    tx: &mut Transaction<'_, Sqlite>,
    conversation: &Conversation,
) -> Result<(), ApiError> {
    sqlx::query("DELETE FROM messages WHERE conversation_id = ?1")
        .bind(&conversation.id)
        .execute(&mut **tx)
        .await
        .map_err(ApiError::internal)?;

    for (seq, message) in conversation.messages.iter().enumerate() {
        sqlx::query(
            "\
            INSERT INTO messages (id, conversation_id, seq, role, content, complete, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&message.id)
        .bind(&conversation.id)
        .bind(seq as i64)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.complete)
        .bind(format_timestamp(&message.timestamp))
        .execute(&mut **tx)
        .await
        .map_err(ApiError::internal)?;
    }
    Ok(())
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, sqlx::Error> {
    Ok(Conversation {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        messages: Vec::new(),
        created_at: parse_timestamp(row.try_get("created_at")?)?,
        updated_at: parse_timestamp(row.try_get("updated_at")?)?,
    })
}

fn message_from_row(row: SqliteRow) -> Result<Message, sqlx::Error> {
    let raw_role: String = row.try_get("role")?;
    let role = Role::parse(&raw_role).ok_or_else(|| {
        sqlx::Error::Decode(format!("unknown message role '{}'", raw_role).into())
    })?;

    Ok(Message {
        id: row.try_get("id")?,
        role,
        content: row.try_get("content")?,
        complete: row.try_get("complete")?,
        timestamp: parse_timestamp(row.try_get("timestamp")?)?,
    })
}

fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: String) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| sqlx::Error::Decode(Box::new(err)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) async fn test_repository() -> SqliteConversationRepository {
        let tmp = std::env::temp_dir().join(format!(
            "awakened-conversations-test-{}.db",
            uuid::Uuid::new_v4()
        ));
        SqliteConversationRepository::new(tmp).await.unwrap()
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, minute, 0).unwrap()
    }

    fn sample() -> Conversation {
        let mut conv = Conversation::new("", at(0));
        conv.append(Message::new(Role::User, "What is mysticism?", at(1)), at(1));
        conv.append(Message::new(Role::Assistant, "An answer.", at(2)), at(2));
        conv
    }

    #[tokio::test]
    async fn put_then_get_round_trips_message_order() {
        let repo = test_repository().await;
        let conv = sample();
        repo.put(&conv).await.unwrap();

        let loaded = repo.get(&conv.id).await.unwrap().unwrap();
        assert_eq!(loaded, conv);
    }

    #[tokio::test]
    async fn last_write_wins() {
        let repo = test_repository().await;
        let conv = sample();
        repo.put(&conv).await.unwrap();

        let mut shorter = conv.clone();
        shorter.messages.truncate(1);
        shorter.title = "Renamed".into();
        shorter.updated_at = at(30);
        repo.put(&shorter).await.unwrap();

        let loaded = repo.get(&conv.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Renamed");
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.updated_at, at(30));
    }

    #[tokio::test]
    async fn list_orders_by_updated_at_and_attaches_messages() {
        let repo = test_repository().await;
        let older = sample();
        let mut newer = Conversation::new("Second", at(5));
        newer.updated_at = at(40);

        repo.put(&older).await.unwrap();
        repo.put(&newer).await.unwrap();

        let listed = repo.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert!(listed[0].messages.is_empty());
        assert_eq!(listed[1].messages.len(), 2);
    }

    #[tokio::test]
    async fn delete_cascades_and_reports_missing() {
        let repo = test_repository().await;
        let conv = sample();
        repo.put(&conv).await.unwrap();

        assert!(repo.delete(&conv.id).await.unwrap());
        assert!(repo.get(&conv.id).await.unwrap().is_none());
        assert!(!repo.delete(&conv.id).await.unwrap());

        let orphaned: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        assert_eq!(orphaned, 0);
    }

    #[tokio::test]
    async fn pending_answers_keep_their_completion_flag() {
        let repo = test_repository().await;
        let mut conv = sample();
        conv.append(Message::pending_answer(at(3)), at(3));
        repo.put(&conv).await.unwrap();

        let loaded = repo.get(&conv.id).await.unwrap().unwrap();
        assert!(!loaded.messages[2].complete);
        assert!(loaded.messages[1].complete);
    }

    #[tokio::test]
    async fn reopening_keeps_existing_rows() {
        let tmp = std::env::temp_dir().join(format!(
            "awakened-conversations-reopen-{}.db",
            uuid::Uuid::new_v4()
        ));
        let conv = sample();
        {
            let repo = SqliteConversationRepository::new(tmp.clone()).await.unwrap();
            repo.put(&conv).await.unwrap();
        }
        let repo = SqliteConversationRepository::new(tmp).await.unwrap();
        assert!(repo.get(&conv.id).await.unwrap().is_some());
    }
}
