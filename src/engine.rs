//! Companion engine: the operation surface of the reading companion.
//!
//! Wires the library store, the LLM provider, and the per-session stacks
//! into the exposed operations: ask, position updates, history
//! navigation, citation jumps, search, ingest. Each operation is scoped
//! to one (book, session) pair; failures never outlive the request.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::config::EngineConfig;
use crate::core::errors::EngineError;
use crate::library::ingest::{self, IngestLock, IngestSummary};
use crate::library::store::LibraryStore;
use crate::library::types::{ChapterDraft, QaTurn, ReadingPosition, SourceLocation};
use crate::llm::LlmProvider;
use crate::qa::{AnswerEvent, AnswerJob, ContextAssembler, PositionGate, Retriever, StreamingAnswerer};
use crate::search::{self, SearchMatch};
use crate::session::SessionManager;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PositionUpdate {
    pub chapter_index: Option<i64>,
    /// Direct position override; wins over the percent mapping.
    pub position_index: Option<i64>,
    pub chapter_percent: Option<f64>,
    pub book_percent: Option<f64>,
}

/// Where a citation jump lands. The reader UI performs the actual
/// navigation and reports the new position back as a normal update.
#[derive(Debug, Clone, Serialize)]
pub struct JumpTarget {
    pub position: ReadingPosition,
    pub source_location: SourceLocation,
}

pub struct CompanionEngine {
    store: LibraryStore,
    provider: Arc<dyn LlmProvider>,
    answerer: StreamingAnswerer,
    sessions: SessionManager,
    ingest_lock: IngestLock,
    config: EngineConfig,
}

impl CompanionEngine {
    pub fn new(store: LibraryStore, provider: Arc<dyn LlmProvider>, config: EngineConfig) -> Self {
        let answerer = StreamingAnswerer::new(
            provider.clone(),
            store.clone(),
            Duration::from_secs(config.stream_delta_timeout_secs),
        );
        Self {
            sessions: SessionManager::new(config.history_cap),
            ingest_lock: IngestLock::default(),
            answerer,
            store,
            provider,
            config,
        }
    }

    pub fn store(&self) -> &LibraryStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Ingest / catalog
    // ------------------------------------------------------------------

    /// Register a new book and ingest its extracted chapter texts. The
    /// book is visible to readers only after the whole chunk set and its
    /// vectors are stored.
    pub async fn create_book(
        &self,
        title: &str,
        author: &str,
        chapters: &[ChapterDraft],
    ) -> Result<IngestSummary, EngineError> {
        let book_id = self.store.create_book(title, author).await?;
        ingest::ingest_book(
            &self.store,
            self.provider.as_ref(),
            &self.config,
            &self.ingest_lock,
            book_id,
            title,
            author,
            chapters,
        )
        .await
    }

    pub async fn delete_book(&self, book_id: i64) -> Result<bool, EngineError> {
        let deleted = self.store.delete_book(book_id).await?;
        if deleted {
            self.sessions.forget_book(book_id).await;
        }
        Ok(deleted)
    }

    // ------------------------------------------------------------------
    // Ask
    // ------------------------------------------------------------------

    /// Answer a question from what the reader has read so far, streaming
    /// the result. A new question for the same (book, session) cancels
    /// the in-flight stream. An empty admissible window completes
    /// immediately with the defined no-content answer.
    pub async fn ask(
        &self,
        book_id: i64,
        session_id: &str,
        question: &str,
    ) -> Result<mpsc::Receiver<AnswerEvent>, EngineError> {
        self.store.require_book(book_id).await?;
        let session = self.sessions.context(&self.store, book_id, session_id).await?;

        let gate = PositionGate::new(self.store.position(book_id).await?);
        let job = AnswerJob {
            book_id,
            session_id: session_id.to_string(),
            question: question.to_string(),
            model: self.config.qa_model.clone(),
            position_context: gate.position().cloned(),
        };

        if gate.is_unset() {
            tracing::debug!("book {} has no reading position, short-circuiting", book_id);
            return self.answerer.short_circuit(session, job).await;
        }

        let retriever = Retriever::new(
            &self.store,
            self.provider.as_ref(),
            &self.config.embedding_model,
            self.config.retrieval_top_k,
            Duration::from_secs(self.config.embed_timeout_secs),
        );
        let ranked = retriever.retrieve(book_id, &gate, question).await?;

        if ranked.is_empty() {
            return self.answerer.short_circuit(session, job).await;
        }

        let assembled =
            ContextAssembler::new(self.config.context_char_budget).assemble(question, ranked);

        self.answerer.start(session, job, assembled).await
    }

    // ------------------------------------------------------------------
    // Position
    // ------------------------------------------------------------------

    /// Apply a reader navigation event. Accepts either an explicit
    /// position index or a chapter percentage, which is mapped through
    /// the chapter's chunk span. Last write wins.
    pub async fn set_position(
        &self,
        book_id: i64,
        update: PositionUpdate,
    ) -> Result<ReadingPosition, EngineError> {
        self.store.require_book(book_id).await?;

        let existing = self.store.position(book_id).await?;
        let chapter_index = update
            .chapter_index
            .or(existing.as_ref().map(|p| p.chapter_index))
            .ok_or(EngineError::InvalidPosition("chapter_index is required"))?;

        let chapter_percent = update.chapter_percent.map(|p| p.clamp(0.0, 100.0));
        let position_index = match update.position_index {
            Some(index) => index,
            None => {
                let chapter = self
                    .store
                    .chapter(book_id, chapter_index)
                    .await?
                    .ok_or(EngineError::ChapterNotFound(chapter_index))?;
                let span = (chapter.end_position - chapter.start_position).max(0) as f64;
                let percent = chapter_percent.unwrap_or(0.0);
                chapter.start_position + (span * percent / 100.0) as i64
            }
        };

        let position = ReadingPosition {
            chapter_index,
            position_index,
            chapter_percent,
            book_percent: update.book_percent.map(|p| p.clamp(0.0, 100.0)),
        };
        self.store.set_position(book_id, &position).await?;
        Ok(position)
    }

    pub async fn position(&self, book_id: i64) -> Result<Option<ReadingPosition>, EngineError> {
        self.store.require_book(book_id).await?;
        self.store.position(book_id).await
    }

    // ------------------------------------------------------------------
    // History navigation
    // ------------------------------------------------------------------

    pub async fn history_back(
        &self,
        book_id: i64,
        session_id: &str,
    ) -> Result<QaTurn, EngineError> {
        self.store.require_book(book_id).await?;
        let session = self.sessions.context(&self.store, book_id, session_id).await?;
        let mut guard = session.lock().await;
        guard.history.back().cloned()
    }

    pub async fn history_forward(
        &self,
        book_id: i64,
        session_id: &str,
    ) -> Result<QaTurn, EngineError> {
        self.store.require_book(book_id).await?;
        let session = self.sessions.context(&self.store, book_id, session_id).await?;
        let mut guard = session.lock().await;
        guard.history.forward().cloned()
    }

    pub async fn turns(
        &self,
        book_id: i64,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<QaTurn>, EngineError> {
        self.store.require_book(book_id).await?;
        self.store.recent_turns(book_id, session_id, limit).await
    }

    // ------------------------------------------------------------------
    // Citation jumps
    // ------------------------------------------------------------------

    /// Follow a citation: save the current position on the return stack
    /// and hand back the cited chunk's location for the UI to navigate.
    pub async fn jump_citation(
        &self,
        book_id: i64,
        session_id: &str,
        chunk_id: i64,
    ) -> Result<JumpTarget, EngineError> {
        self.store.require_book(book_id).await?;
        let chunk = self
            .store
            .chunk(book_id, chunk_id)
            .await?
            .ok_or(EngineError::ChunkNotFound(chunk_id))?;

        if let Some(current) = self.store.position(book_id).await? {
            let session = self.sessions.context(&self.store, book_id, session_id).await?;
            session.lock().await.returns.push_jump(current);
        }

        Ok(JumpTarget {
            position: ReadingPosition::new(chunk.chapter_index, chunk.position_index),
            source_location: chunk.source_location,
        })
    }

    /// Undo the most recent citation jump, if any.
    pub async fn return_from_jump(
        &self,
        book_id: i64,
        session_id: &str,
    ) -> Result<Option<ReadingPosition>, EngineError> {
        self.store.require_book(book_id).await?;
        let session = self.sessions.context(&self.store, book_id, session_id).await?;
        let mut guard = session.lock().await;
        Ok(guard.returns.pop_return())
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// Exact-text search bounded to what the reader has reached. With no
    /// position set there is nothing searchable yet.
    pub async fn search(
        &self,
        book_id: i64,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchMatch>, EngineError> {
        self.store.require_book(book_id).await?;

        let Some(position) = self.store.position(book_id).await? else {
            return Ok(Vec::new());
        };

        let scan_limit = (limit * 6).clamp(200, 1200) as i64;
        let chunks = self
            .store
            .text_search(book_id, position.position_index, query, scan_limit)
            .await?;

        Ok(search::collect_matches(&chunks, query, limit))
    }
}
