//! SQLite-backed library store.
//!
//! Holds books, chapters, chunks (with embedding vectors), durable reading
//! positions, and the uncapped QA-turn log. Chunk sets are write-once per
//! book: readers only see chunks of books whose `embedding_status` is
//! `ready`, and that flip happens in a single update after every chunk and
//! vector has been committed.

use std::path::PathBuf;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use crate::core::errors::EngineError;
use crate::library::types::{
    Book, Chapter, Chunk, EmbeddingStatus, QaTurn, ReadingPosition, SourceLocation,
};
use crate::vector_math;

#[derive(Debug, Clone)]
pub struct LibraryStore {
    pool: SqlitePool,
    #[allow(dead_code)]
    db_path: PathBuf,
}

/// A chunk prepared by the ingest pipeline, not yet assigned a row id.
#[derive(Debug, Clone)]
pub struct ChunkDraft {
    pub chapter_index: i64,
    pub chapter_title: Option<String>,
    pub position_index: i64,
    pub spine_href: Option<String>,
    pub anchor_text: Option<String>,
    pub text: String,
}

impl LibraryStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, EngineError> {
        let options = SqliteConnectOptions::new()
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
            .connect_with(options)
            .await
            .map_err(EngineError::storage)?;

        let store = Self { pool, db_path };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), EngineError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS books (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                author TEXT NOT NULL DEFAULT 'Unknown',
                total_chunks INTEGER NOT NULL DEFAULT 0,
                embedding_status TEXT NOT NULL DEFAULT 'processing',
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
            "CREATE TABLE IF NOT EXISTS chapters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                book_id INTEGER NOT NULL,
                chapter_index INTEGER NOT NULL,
                title TEXT,
                spine_href TEXT,
                start_position INTEGER NOT NULL,
                end_position INTEGER NOT NULL,
                UNIQUE(book_id, chapter_index),
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                book_id INTEGER NOT NULL,
                chapter_index INTEGER NOT NULL,
                chapter_title TEXT,
                position_index INTEGER NOT NULL,
                spine_href TEXT,
                anchor_text TEXT,
                text TEXT NOT NULL,
                embedding BLOB,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            )",
            "CREATE INDEX IF NOT EXISTS idx_chunks_book_position
                ON chunks(book_id, chapter_index, position_index)",
            "CREATE TABLE IF NOT EXISTS positions (
                book_id INTEGER PRIMARY KEY,
                chapter_index INTEGER NOT NULL,
                position_index INTEGER NOT NULL,
                chapter_percent REAL,
                book_percent REAL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                book_id INTEGER NOT NULL,
                session_id TEXT NOT NULL DEFAULT 'default',
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                model TEXT NOT NULL DEFAULT '',
                position_chapter INTEGER,
                position_index INTEGER,
                citations TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            )",
            "CREATE INDEX IF NOT EXISTS idx_turns_book_session
                ON turns(book_id, session_id, id)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(EngineError::storage)?;
        }

        Ok(())
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

    fn row_to_book(row: &sqlx::sqlite::SqliteRow) -> Book {
        let status: String = row.get("embedding_status");
        Book {
            book_id: row.get("id"),
            title: row.get("title"),
            author: row.get("author"),
            total_chunks: row.get("total_chunks"),
            embedding_status: EmbeddingStatus::parse(&status),
            created_at: row.get("created_at"),
        }
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Chunk {
        let embedding_bytes: Option<Vec<u8>> = row.get("embedding");
        Chunk {
            chunk_id: row.get("id"),
            book_id: row.get("book_id"),
            chapter_index: row.get("chapter_index"),
            chapter_title: row.get("chapter_title"),
            position_index: row.get("position_index"),
            text: row.get("text"),
            embedding: embedding_bytes
                .map(|b| Self::deserialize_embedding(&b))
                .unwrap_or_default(),
            source_location: SourceLocation {
                spine_href: row.get("spine_href"),
                anchor_text: row.get("anchor_text"),
            },
        }
    }

    // ------------------------------------------------------------------
    // Books
    // ------------------------------------------------------------------

    pub async fn create_book(&self, title: &str, author: &str) -> Result<i64, EngineError> {
        let result = sqlx::query(
            "INSERT INTO books (title, author, embedding_status) VALUES (?1, ?2, 'processing')",
        )
        .bind(title)
        .bind(author)
        .execute(&self.pool)
        .await
        .map_err(EngineError::storage)?;

        Ok(result.last_insert_rowid())
    }

    pub async fn book(&self, book_id: i64) -> Result<Option<Book>, EngineError> {
        let row = sqlx::query(
            "SELECT id, title, author, total_chunks, embedding_status, created_at
             FROM books WHERE id = ?1",
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(EngineError::storage)?;

        Ok(row.as_ref().map(Self::row_to_book))
    }

    pub async fn require_book(&self, book_id: i64) -> Result<Book, EngineError> {
        self.book(book_id)
            .await?
            .ok_or(EngineError::BookNotFound(book_id))
    }

    pub async fn list_books(&self) -> Result<Vec<Book>, EngineError> {
        let rows = sqlx::query(
            "SELECT id, title, author, total_chunks, embedding_status, created_at
             FROM books ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::storage)?;

        Ok(rows.iter().map(Self::row_to_book).collect())
    }

    pub async fn delete_book(&self, book_id: i64) -> Result<bool, EngineError> {
        let mut tx = self.pool.begin().await.map_err(EngineError::storage)?;
        for table in ["turns", "positions", "chunks", "chapters"] {
            let statement = format!("DELETE FROM {table} WHERE book_id = ?1");
            sqlx::query(&statement)
                .bind(book_id)
                .execute(&mut *tx)
                .await
                .map_err(EngineError::storage)?;
        }
        let result = sqlx::query("DELETE FROM books WHERE id = ?1")
            .bind(book_id)
            .execute(&mut *tx)
            .await
            .map_err(EngineError::storage)?;
        tx.commit().await.map_err(EngineError::storage)?;

        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Ingest
    // ------------------------------------------------------------------

    /// Store a book's complete chapter and chunk set in one transaction.
    /// The book stays invisible to readers until [`mark_ready`] flips its
    /// status after this commit succeeds.
    ///
    /// [`mark_ready`]: LibraryStore::mark_ready
    pub async fn store_ingest(
        &self,
        book_id: i64,
        chapters: &[Chapter],
        chunks: &[(ChunkDraft, Vec<f32>)],
    ) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await.map_err(EngineError::storage)?;

        for chapter in chapters {
            sqlx::query(
                "INSERT INTO chapters
                    (book_id, chapter_index, title, spine_href, start_position, end_position)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(book_id)
            .bind(chapter.chapter_index)
            .bind(&chapter.title)
            .bind(&chapter.spine_href)
            .bind(chapter.start_position)
            .bind(chapter.end_position)
            .execute(&mut *tx)
            .await
            .map_err(EngineError::storage)?;
        }

        for (draft, embedding) in chunks {
            let blob = Self::serialize_embedding(embedding);
            sqlx::query(
                "INSERT INTO chunks
                    (book_id, chapter_index, chapter_title, position_index,
                     spine_href, anchor_text, text, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .bind(book_id)
            .bind(draft.chapter_index)
            .bind(&draft.chapter_title)
            .bind(draft.position_index)
            .bind(&draft.spine_href)
            .bind(&draft.anchor_text)
            .bind(&draft.text)
            .bind(&blob)
            .execute(&mut *tx)
            .await
            .map_err(EngineError::storage)?;
        }

        tx.commit().await.map_err(EngineError::storage)?;
        Ok(())
    }

    pub async fn mark_ready(
        &self,
        book_id: i64,
        title: &str,
        author: &str,
        total_chunks: i64,
    ) -> Result<(), EngineError> {
        sqlx::query(
            "UPDATE books
             SET title = ?1, author = ?2, total_chunks = ?3, embedding_status = 'ready'
             WHERE id = ?4",
        )
        .bind(title)
        .bind(author)
        .bind(total_chunks)
        .bind(book_id)
        .execute(&self.pool)
        .await
        .map_err(EngineError::storage)?;
        Ok(())
    }

    pub async fn mark_failed(&self, book_id: i64) -> Result<(), EngineError> {
        sqlx::query("UPDATE books SET embedding_status = 'failed' WHERE id = ?1")
            .bind(book_id)
            .execute(&self.pool)
            .await
            .map_err(EngineError::storage)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Chunks
    // ------------------------------------------------------------------

    /// All chunks of a ready book in ascending
    /// `(chapter_index, position_index)` order. Books still processing
    /// (or failed) present an empty chunk set.
    pub async fn ordered_chunks(&self, book_id: i64) -> Result<Vec<Chunk>, EngineError> {
        let rows = sqlx::query(
            "SELECT c.id, c.book_id, c.chapter_index, c.chapter_title, c.position_index,
                    c.spine_href, c.anchor_text, c.text, c.embedding
             FROM chunks c
             JOIN books b ON b.id = c.book_id AND b.embedding_status = 'ready'
             WHERE c.book_id = ?1
             ORDER BY c.chapter_index, c.position_index",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::storage)?;

        Ok(rows.iter().map(Self::row_to_chunk).collect())
    }

    pub async fn chunk(&self, book_id: i64, chunk_id: i64) -> Result<Option<Chunk>, EngineError> {
        let row = sqlx::query(
            "SELECT c.id, c.book_id, c.chapter_index, c.chapter_title, c.position_index,
                    c.spine_href, c.anchor_text, c.text, c.embedding
             FROM chunks c
             JOIN books b ON b.id = c.book_id AND b.embedding_status = 'ready'
             WHERE c.book_id = ?1 AND c.id = ?2",
        )
        .bind(book_id)
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(EngineError::storage)?;

        Ok(row.as_ref().map(Self::row_to_chunk))
    }

    pub async fn chapter(
        &self,
        book_id: i64,
        chapter_index: i64,
    ) -> Result<Option<Chapter>, EngineError> {
        let row = sqlx::query(
            "SELECT chapter_index, title, spine_href, start_position, end_position
             FROM chapters WHERE book_id = ?1 AND chapter_index = ?2",
        )
        .bind(book_id)
        .bind(chapter_index)
        .fetch_optional(&self.pool)
        .await
        .map_err(EngineError::storage)?;

        Ok(row.map(|row| Chapter {
            chapter_index: row.get("chapter_index"),
            title: row.get("title"),
            spine_href: row.get("spine_href"),
            start_position: row.get("start_position"),
            end_position: row.get("end_position"),
        }))
    }

    /// Rank the admissible chunks of a book against a query embedding.
    ///
    /// Admissibility (`chapter < c`, or same chapter and `position <= p`)
    /// is applied in SQL before any scoring, so an out-of-bounds chunk can
    /// never surface regardless of its similarity. Ties on score prefer
    /// the chunk closest to the reader's position.
    pub async fn nearest(
        &self,
        book_id: i64,
        position: &ReadingPosition,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<(Chunk, f32)>, EngineError> {
        let rows = sqlx::query(
            "SELECT c.id, c.book_id, c.chapter_index, c.chapter_title, c.position_index,
                    c.spine_href, c.anchor_text, c.text, c.embedding
             FROM chunks c
             JOIN books b ON b.id = c.book_id AND b.embedding_status = 'ready'
             WHERE c.book_id = ?1
               AND (c.chapter_index < ?2
                    OR (c.chapter_index = ?2 AND c.position_index <= ?3))",
        )
        .bind(book_id)
        .bind(position.chapter_index)
        .bind(position.position_index)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::storage)?;

        let mut scored: Vec<(Chunk, f32)> = rows
            .iter()
            .map(Self::row_to_chunk)
            .filter(|chunk| !chunk.embedding.is_empty())
            .map(|chunk| {
                let score = vector_math::cosine_similarity(query_embedding, &chunk.embedding);
                (chunk, score)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    (b.0.chapter_index, b.0.position_index)
                        .cmp(&(a.0.chapter_index, a.0.position_index))
                })
        });
        scored.truncate(k.max(1));

        Ok(scored)
    }

    /// Case-insensitive substring search over chunks at or before the
    /// given global position, ascending by position.
    pub async fn text_search(
        &self,
        book_id: i64,
        max_position: i64,
        pattern: &str,
        scan_limit: i64,
    ) -> Result<Vec<Chunk>, EngineError> {
        let escaped = format!("%{}%", pattern.trim());
        if escaped == "%%" {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT c.id, c.book_id, c.chapter_index, c.chapter_title, c.position_index,
                    c.spine_href, c.anchor_text, c.text, c.embedding
             FROM chunks c
             JOIN books b ON b.id = c.book_id AND b.embedding_status = 'ready'
             WHERE c.book_id = ?1
               AND c.position_index <= ?2
               AND c.text LIKE ?3 COLLATE NOCASE
             ORDER BY c.position_index
             LIMIT ?4",
        )
        .bind(book_id)
        .bind(max_position)
        .bind(&escaped)
        .bind(scan_limit)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::storage)?;

        Ok(rows.iter().map(Self::row_to_chunk).collect())
    }

    // ------------------------------------------------------------------
    // Positions
    // ------------------------------------------------------------------

    /// Last-write-wins upsert of the reader's current position.
    pub async fn set_position(
        &self,
        book_id: i64,
        position: &ReadingPosition,
    ) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO positions
                (book_id, chapter_index, position_index, chapter_percent, book_percent, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
             ON CONFLICT(book_id) DO UPDATE SET
                chapter_index = excluded.chapter_index,
                position_index = excluded.position_index,
                chapter_percent = excluded.chapter_percent,
                book_percent = excluded.book_percent,
                updated_at = excluded.updated_at",
        )
        .bind(book_id)
        .bind(position.chapter_index)
        .bind(position.position_index)
        .bind(position.chapter_percent)
        .bind(position.book_percent)
        .execute(&self.pool)
        .await
        .map_err(EngineError::storage)?;
        Ok(())
    }

    pub async fn position(&self, book_id: i64) -> Result<Option<ReadingPosition>, EngineError> {
        let row = sqlx::query(
            "SELECT chapter_index, position_index, chapter_percent, book_percent
             FROM positions WHERE book_id = ?1",
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(EngineError::storage)?;

        Ok(row.map(|row| ReadingPosition {
            chapter_index: row.get("chapter_index"),
            position_index: row.get("position_index"),
            chapter_percent: row.get("chapter_percent"),
            book_percent: row.get("book_percent"),
        }))
    }

    // ------------------------------------------------------------------
    // Turns (durable, uncapped)
    // ------------------------------------------------------------------

    pub async fn save_turn(
        &self,
        book_id: i64,
        session_id: &str,
        turn: &QaTurn,
    ) -> Result<i64, EngineError> {
        let citations =
            serde_json::to_string(&turn.resolved_citations).map_err(EngineError::storage)?;

        let result = sqlx::query(
            "INSERT INTO turns
                (book_id, session_id, question, answer, model,
                 position_chapter, position_index, citations)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(book_id)
        .bind(session_id)
        .bind(&turn.question)
        .bind(&turn.answer_text)
        .bind(&turn.model)
        .bind(turn.position_context.as_ref().map(|p| p.chapter_index))
        .bind(turn.position_context.as_ref().map(|p| p.position_index))
        .bind(&citations)
        .execute(&self.pool)
        .await
        .map_err(EngineError::storage)?;

        Ok(result.last_insert_rowid())
    }

    /// The most recent `limit` turns for a (book, session), oldest first.
    /// This is the hydration source for the in-memory history stack; the
    /// table itself keeps everything.
    pub async fn recent_turns(
        &self,
        book_id: i64,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<QaTurn>, EngineError> {
        let rows = sqlx::query(
            "SELECT question, answer, model, position_chapter, position_index,
                    citations, created_at
             FROM (
                 SELECT id, question, answer, model, position_chapter, position_index,
                        citations, created_at
                 FROM turns
                 WHERE book_id = ?1 AND session_id = ?2
                 ORDER BY id DESC
                 LIMIT ?3
             )
             ORDER BY id ASC",
        )
        .bind(book_id)
        .bind(session_id)
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::storage)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let citations_raw: String = row.get("citations");
                let resolved_citations =
                    serde_json::from_str(&citations_raw).unwrap_or_default();
                let position_context = match (
                    row.get::<Option<i64>, _>("position_chapter"),
                    row.get::<Option<i64>, _>("position_index"),
                ) {
                    (Some(chapter), Some(position)) => {
                        Some(ReadingPosition::new(chapter, position))
                    }
                    _ => None,
                };

                QaTurn {
                    question: row.get("question"),
                    answer_text: row.get("answer"),
                    resolved_citations,
                    position_context,
                    model: row.get("model"),
                    timestamp: row.get("created_at"),
                }
            })
            .collect())
    }
}
