//! SQLite-backed corpus store.
//!
//! Chunks live in `chunks` (embedding as little-endian f32 BLOB) and are
//! mirrored into the `chunks_fts` FTS5 table for lexical search. Vector
//! search is brute-force cosine similarity.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};

use super::store::CorpusStore;
use super::types::{Chunk, ChunkMetadata, Document, SearchFilters};
use crate::core::errors::ApiError;

pub struct SqliteCorpusStore {
    pool: SqlitePool,
}

impl SqliteCorpusStore {
    pub async fn with_path(db_path: PathBuf) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL DEFAULT '',
                author TEXT,
                creator TEXT,
                subject TEXT,
                filename TEXT,
                path TEXT,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT REFERENCES documents(id) ON DELETE CASCADE,
                chunk_index INTEGER NOT NULL DEFAULT 0,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                embedding BLOB
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        // FTS5 has no IF NOT EXISTS for virtual tables in older SQLite builds.
        let fts_exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'chunks_fts'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        if !fts_exists {
            sqlx::query(
                "CREATE VIRTUAL TABLE chunks_fts USING fts5(
                    chunk_id UNINDEXED,
                    document_id UNINDEXED,
                    text
                )",
            )
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        }

        Ok(())
    }

    /// Inserts or replaces a document. Used to seed fixtures; ingestion
    /// proper happens outside this service.
    pub async fn upsert_document(&self, document: &Document) -> Result<(), ApiError> {
        sqlx::query(
            "INSERT INTO documents (id, title, author, creator, subject, filename, path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                author = excluded.author,
                creator = excluded.creator,
                subject = excluded.subject,
                filename = excluded.filename,
                path = excluded.path",
        )
        .bind(&document.id)
        .bind(&document.title)
        .bind(&document.author)
        .bind(&document.creator)
        .bind(&document.subject)
        .bind(&document.filename)
        .bind(&document.path)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;
        Ok(())
    }

    /// Inserts or replaces a chunk and its full-text row.
    pub async fn insert_chunk(&self, chunk: &Chunk, embedding: &[f32]) -> Result<(), ApiError> {
        let metadata = serde_json::to_string(&chunk.metadata).map_err(ApiError::internal)?;
        let blob = serialize_embedding(embedding);
        let chunk_index: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks WHERE document_id IS ?1 AND id != ?2",
        )
        .bind(&chunk.document_id)
        .bind(&chunk.id)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        sqlx::query(
            "INSERT OR REPLACE INTO chunks (id, document_id, chunk_index, text, metadata, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk_index)
        .bind(&chunk.text)
        .bind(&metadata)
        .bind(&blob)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?1")
            .bind(&chunk.id)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?1, ?2, ?3)")
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    pub async fn count_chunks(&self) -> Result<usize, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(count as usize)
    }
}

#[async_trait]
impl CorpusStore for SqliteCorpusStore {
    async fn lexical_candidates(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<String>, ApiError> {
        let Some(match_expr) = fts_match_expression(query) else {
            return Ok(Vec::new());
        };

        let fields = filters.fields();
        let mut sql = String::from("SELECT chunks_fts.chunk_id AS chunk_id FROM chunks_fts");
        if !fields.is_empty() {
            sql.push_str(" JOIN documents ON documents.id = chunks_fts.document_id");
        }
        sql.push_str(" WHERE chunks_fts MATCH ?");
        for (column, _) in &fields {
            sql.push_str(&format!(" AND documents.{} = ?", column));
        }
        sql.push_str(" ORDER BY rank LIMIT ?");

        let mut q = sqlx::query(&sql).bind(&match_expr);
        for (_, value) in &fields {
            q = q.bind(*value);
        }
        let rows = q
            .bind(limit.max(1) as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("chunk_id"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ApiError::internal)
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<Chunk>, ApiError> {
        let fields = filters.fields();
        let mut sql = String::from(
            "SELECT chunks.id, chunks.document_id, chunks.text, chunks.metadata, chunks.embedding
             FROM chunks",
        );
        if !fields.is_empty() {
            sql.push_str(" JOIN documents ON documents.id = chunks.document_id");
        }
        sql.push_str(" WHERE chunks.embedding IS NOT NULL");
        for (column, _) in &fields {
            sql.push_str(&format!(" AND documents.{} = ?", column));
        }
        sql.push_str(" ORDER BY chunks.rowid");

        let mut q = sqlx::query(&sql);
        for (_, value) in &fields {
            q = q.bind(*value);
        }
        let rows = q.fetch_all(&self.pool).await.map_err(ApiError::internal)?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding").map_err(ApiError::internal)?;
            if blob.is_empty() {
                continue;
            }
            let score = cosine_similarity(embedding, &deserialize_embedding(&blob));
            scored.push(chunk_from_row(row).map_err(ApiError::internal)?.with_score(score));
        }

        // sort_by is stable, so equal scores keep index order.
        scored.sort_by(|a, b| {
            let (a, b) = (a.similarity_score.unwrap_or(0.0), b.similarity_score.unwrap_or(0.0));
            b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn fetch_documents(&self, ids: &[String]) -> Result<Vec<Document>, ApiError> {
        let mut documents = Vec::with_capacity(ids.len());
        for batch in ids.chunks(500) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "SELECT id, title, author, creator, subject, filename, path, created_at
                 FROM documents
                 WHERE id IN ({})",
                placeholders
            );
            let mut q = sqlx::query(&sql);
            for id in batch {
                q = q.bind(id);
            }
            let rows = q.fetch_all(&self.pool).await.map_err(ApiError::internal)?;
            for row in &rows {
                documents.push(document_from_row(row).map_err(ApiError::internal)?);
            }
        }
        Ok(documents)
    }
}

/// Turns free text into an FTS5 expression: every alphanumeric term quoted,
/// joined with OR. Returns `None` when nothing searchable remains.
fn fts_match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{}\"", term.to_lowercase()))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

fn chunk_from_row(row: &SqliteRow) -> Result<Chunk, sqlx::Error> {
    let metadata_str: String = row.try_get("metadata")?;
    let metadata = serde_json::from_str::<ChunkMetadata>(&metadata_str).unwrap_or_default();

    Ok(Chunk {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        text: row.try_get("text")?,
        similarity_score: None,
        metadata,
        document: None,
    })
}

fn document_from_row(row: &SqliteRow) -> Result<Document, sqlx::Error> {
    Ok(Document {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        author: row.try_get("author")?,
        creator: row.try_get("creator")?,
        subject: row.try_get("subject")?,
        filename: row.try_get("filename")?,
        path: row.try_get("path")?,
        created_at: row.try_get("created_at")?,
    })
}

fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
