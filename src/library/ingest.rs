//! Ingest pipeline.
//!
//! Takes pre-extracted chapter texts (EPUB parsing happens upstream),
//! packs paragraphs into chunks around an approximate token target, embeds
//! every chunk, and stores the whole set before flipping the book's
//! visibility to `ready`. One ingest per book at a time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::core::config::EngineConfig;
use crate::core::errors::EngineError;
use crate::library::store::{ChunkDraft, LibraryStore};
use crate::library::types::{Chapter, ChapterDraft};
use crate::llm::LlmProvider;

const ANCHOR_CHARS: usize = 80;

/// Rough token estimate; ~4 chars per token holds well enough for chunk
/// sizing and avoids shipping a tokenizer.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4 + 1
}

pub fn clean_text(text: &str) -> String {
    let mut cleaned = text.replace('\r', "");
    while cleaned.contains("\n\n\n") {
        cleaned = cleaned.replace("\n\n\n", "\n\n");
    }
    cleaned.trim().to_string()
}

/// Split one chapter into paragraph-packed chunks. `start_position` is the
/// global position of the chapter's first chunk; returns the drafts and
/// the next free global position.
pub fn chunk_chapter(
    text: &str,
    chapter_index: i64,
    chapter_title: Option<&str>,
    spine_href: Option<&str>,
    start_position: i64,
    token_target: usize,
) -> (Vec<ChunkDraft>, i64) {
    let paragraphs: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let mut drafts = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_tokens = 0usize;
    let mut position_index = start_position;

    let mut flush = |current: &mut Vec<&str>, position_index: &mut i64| {
        if current.is_empty() {
            return;
        }
        let chunk_text = current.join("\n\n");
        drafts.push(ChunkDraft {
            chapter_index,
            chapter_title: chapter_title.map(str::to_string),
            position_index: *position_index,
            spine_href: spine_href.map(str::to_string),
            anchor_text: Some(chunk_text.chars().take(ANCHOR_CHARS).collect()),
            text: chunk_text,
        });
        *position_index += 1;
        current.clear();
    };

    for paragraph in paragraphs {
        let tokens = estimate_tokens(paragraph);
        if !current.is_empty() && current_tokens + tokens > token_target {
            flush(&mut current, &mut position_index);
            current_tokens = 0;
        }
        current.push(paragraph);
        current_tokens += tokens;
    }
    flush(&mut current, &mut position_index);

    (drafts, position_index)
}

/// In-process exclusivity for ingest: one in-flight ingest per book.
#[derive(Debug, Clone, Default)]
pub struct IngestLock {
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

pub struct IngestPermit {
    lock: IngestLock,
    book_id: i64,
}

impl IngestLock {
    pub fn acquire(&self, book_id: i64) -> Result<IngestPermit, EngineError> {
        let mut guard = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !guard.insert(book_id) {
            return Err(EngineError::IngestInProgress);
        }
        Ok(IngestPermit {
            lock: self.clone(),
            book_id,
        })
    }
}

impl Drop for IngestPermit {
    fn drop(&mut self) {
        let mut guard = self
            .lock
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.remove(&self.book_id);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub book_id: i64,
    pub title: String,
    pub author: String,
    pub total_chunks: i64,
}

/// Run the full ingest for a freshly created book. On any failure the
/// book is marked `failed` so it never becomes visible half-written.
pub async fn ingest_book(
    store: &LibraryStore,
    provider: &dyn LlmProvider,
    config: &EngineConfig,
    lock: &IngestLock,
    book_id: i64,
    title: &str,
    author: &str,
    chapter_drafts: &[ChapterDraft],
) -> Result<IngestSummary, EngineError> {
    let _permit = lock.acquire(book_id)?;
    store.require_book(book_id).await?;

    match build_and_store(store, provider, config, book_id, title, author, chapter_drafts).await {
        Ok(summary) => Ok(summary),
        Err(err) => {
            tracing::warn!("ingest for book {} failed: {}", book_id, err);
            store.mark_failed(book_id).await?;
            Err(err)
        }
    }
}

async fn build_and_store(
    store: &LibraryStore,
    provider: &dyn LlmProvider,
    config: &EngineConfig,
    book_id: i64,
    title: &str,
    author: &str,
    chapter_drafts: &[ChapterDraft],
) -> Result<IngestSummary, EngineError> {
    let mut chapters = Vec::new();
    let mut all_drafts = Vec::new();
    let mut position_index = 0i64;

    for (chapter_index, chapter) in chapter_drafts.iter().enumerate() {
        let chapter_index = chapter_index as i64;
        let text = clean_text(&chapter.text);
        let (drafts, next_position) = chunk_chapter(
            &text,
            chapter_index,
            chapter.title.as_deref(),
            chapter.spine_href.as_deref(),
            position_index,
            config.chunk_token_target,
        );

        let (start, end) = match (drafts.first(), drafts.last()) {
            (Some(first), Some(last)) => (first.position_index, last.position_index),
            _ => (position_index, position_index),
        };
        chapters.push(Chapter {
            chapter_index,
            title: chapter.title.clone(),
            spine_href: chapter.spine_href.clone(),
            start_position: start,
            end_position: end,
        });

        all_drafts.extend(drafts);
        position_index = next_position;
    }

    let texts: Vec<String> = all_drafts.iter().map(|d| d.text.clone()).collect();
    let embeddings = if texts.is_empty() {
        Vec::new()
    } else {
        provider
            .embed(&texts, &config.embedding_model)
            .await
            .map_err(|e| EngineError::RetrievalUnavailable(e.to_string()))?
    };

    if embeddings.len() != all_drafts.len() {
        return Err(EngineError::RetrievalUnavailable(format!(
            "embedding count mismatch: {} texts, {} vectors",
            all_drafts.len(),
            embeddings.len()
        )));
    }

    let chunks: Vec<(ChunkDraft, Vec<f32>)> =
        all_drafts.into_iter().zip(embeddings).collect();
    let total_chunks = chunks.len() as i64;

    store.store_ingest(book_id, &chapters, &chunks).await?;
    store.mark_ready(book_id, title, author, total_chunks).await?;

    tracing::info!(
        "ingested book {} ({} chapters, {} chunks)",
        book_id,
        chapters.len(),
        total_chunks
    );

    Ok(IngestSummary {
        book_id,
        title: title.to_string(),
        author: author.to_string(),
        total_chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_collapses_blank_runs() {
        let cleaned = clean_text("a\r\n\n\n\nb\n\nc\r");
        assert_eq!(cleaned, "a\n\nb\n\nc");
    }

    #[test]
    fn chunking_packs_paragraphs_up_to_target() {
        // Four ~25-token paragraphs against a 60-token target: expect two
        // chunks of two paragraphs each.
        let paragraph = "x".repeat(100);
        let text = vec![paragraph.clone(); 4].join("\n\n");

        let (drafts, next) = chunk_chapter(&text, 0, Some("One"), None, 0, 60);

        assert_eq!(drafts.len(), 2);
        assert_eq!(next, 2);
        for draft in &drafts {
            assert_eq!(draft.text.matches(&paragraph).count(), 2);
        }
    }

    #[test]
    fn oversized_paragraph_still_becomes_one_chunk() {
        let text = "y".repeat(10_000);
        let (drafts, next) = chunk_chapter(&text, 0, None, None, 7, 100);

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].position_index, 7);
        assert_eq!(drafts[0].text.chars().count(), 10_000);
        assert_eq!(next, 8);
    }

    #[test]
    fn positions_run_globally_across_chapters() {
        let chapter_text = "one\n\ntwo\n\nthree";
        let (first, next) = chunk_chapter(chapter_text, 0, None, None, 0, 1);
        let (second, _) = chunk_chapter(chapter_text, 1, None, None, next, 1);

        let positions: Vec<i64> = first
            .iter()
            .chain(second.iter())
            .map(|d| d.position_index)
            .collect();
        assert_eq!(positions, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn anchor_text_captures_chunk_opening() {
        let text = format!("{} trailing content", "anchor words ".repeat(20));
        let (drafts, _) = chunk_chapter(&text, 0, None, None, 0, 1000);

        assert_eq!(drafts.len(), 1);
        let anchor = drafts[0].anchor_text.clone().unwrap();
        assert_eq!(anchor.chars().count(), ANCHOR_CHARS);
        assert!(drafts[0].text.starts_with(&anchor));
    }

    #[test]
    fn ingest_lock_is_exclusive_per_book() {
        let lock = IngestLock::default();

        let permit = lock.acquire(1).unwrap();
        assert!(matches!(
            lock.acquire(1),
            Err(EngineError::IngestInProgress)
        ));
        // A different book is unaffected.
        let _other = lock.acquire(2).unwrap();

        drop(permit);
        assert!(lock.acquire(1).is_ok());
    }
}
