//! Query-time retrieval over the admissible chunk set.

use std::time::Duration;

use tokio::time::timeout;

use crate::core::errors::EngineError;
use crate::library::store::LibraryStore;
use crate::library::types::Chunk;
use crate::llm::LlmProvider;
use crate::qa::gate::PositionGate;

#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub chunk: Chunk,
    pub score: f32,
}

pub struct Retriever<'a> {
    store: &'a LibraryStore,
    provider: &'a dyn LlmProvider,
    embedding_model: &'a str,
    top_k: usize,
    embed_timeout: Duration,
}

impl<'a> Retriever<'a> {
    pub fn new(
        store: &'a LibraryStore,
        provider: &'a dyn LlmProvider,
        embedding_model: &'a str,
        top_k: usize,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            embedding_model,
            top_k,
            embed_timeout,
        }
    }

    /// Rank admissible chunks against the question. An unset gate yields
    /// an empty result without touching the embedding capability; an
    /// unreachable or timed-out embedding capability is surfaced as
    /// `RetrievalUnavailable`, never downgraded to an unfiltered search.
    pub async fn retrieve(
        &self,
        book_id: i64,
        gate: &PositionGate,
        question: &str,
    ) -> Result<Vec<RankedChunk>, EngineError> {
        let Some(position) = gate.position() else {
            return Ok(Vec::new());
        };

        let inputs = vec![question.to_string()];
        let embedded = timeout(
            self.embed_timeout,
            self.provider.embed(&inputs, self.embedding_model),
        )
        .await
        .map_err(|_| EngineError::RetrievalUnavailable("embedding timed out".to_string()))?
        .map_err(|e| EngineError::RetrievalUnavailable(e.to_string()))?;

        let query_embedding = embedded
            .into_iter()
            .next()
            .ok_or_else(|| {
                EngineError::RetrievalUnavailable("embedding returned no vector".to_string())
            })?;

        let ranked = self
            .store
            .nearest(book_id, position, &query_embedding, self.top_k)
            .await?;

        debug_assert!(ranked.iter().all(|(chunk, _)| gate.admits_chunk(chunk)));

        Ok(ranked
            .into_iter()
            .map(|(chunk, score)| RankedChunk { chunk, score })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::store::ChunkDraft;
    use crate::library::types::ReadingPosition;
    use crate::llm::testing::MockProvider;
    use tempfile::TempDir;

    async fn seeded_store() -> (LibraryStore, TempDir, i64) {
        let dir = TempDir::new().unwrap();
        let store = LibraryStore::new(dir.path().join("library.db"))
            .await
            .unwrap();
        let book_id = store.create_book("Book", "Author").await.unwrap();

        let mut chunks = Vec::new();
        for chapter in 0..2i64 {
            for i in 0..10i64 {
                let position = chapter * 10 + i;
                let mut embedding = vec![0.0f32; 20];
                embedding[position as usize] = 1.0;
                chunks.push((
                    ChunkDraft {
                        chapter_index: chapter,
                        chapter_title: None,
                        position_index: position,
                        spine_href: None,
                        anchor_text: None,
                        text: format!("chunk {position}"),
                    },
                    embedding,
                ));
            }
        }
        store.store_ingest(book_id, &[], &chunks).await.unwrap();
        store.mark_ready(book_id, "Book", "Author", 20).await.unwrap();

        (store, dir, book_id)
    }

    #[tokio::test]
    async fn unset_position_short_circuits_without_embedding() {
        let (store, _dir, book_id) = seeded_store().await;
        // A failing embed provider proves the capability is never called.
        let provider = MockProvider::failing_embed();
        let retriever = Retriever::new(&store, &provider, "embed", 8, Duration::from_secs(5));

        let ranked = retriever
            .retrieve(book_id, &PositionGate::new(None), "anything")
            .await
            .unwrap();
        assert!(ranked.is_empty());
    }

    #[tokio::test]
    async fn embed_failure_surfaces_retrieval_unavailable() {
        let (store, _dir, book_id) = seeded_store().await;
        let provider = MockProvider::failing_embed();
        let retriever = Retriever::new(&store, &provider, "embed", 8, Duration::from_secs(5));

        let gate = PositionGate::new(Some(ReadingPosition::new(0, 5)));
        let err = retriever
            .retrieve(book_id, &gate, "anything")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RetrievalUnavailable(_)));
    }

    #[tokio::test]
    async fn results_stay_inside_the_admissible_window() {
        let (store, _dir, book_id) = seeded_store().await;

        // Query embedding points at chunk 15, which the reader has not
        // reached. The best admissible match must win instead.
        let mut query = vec![0.0f32; 20];
        query[15] = 1.0;
        query[3] = 0.5;
        let provider = MockProvider::new(query);

        let retriever = Retriever::new(&store, &provider, "embed", 12, Duration::from_secs(5));
        let gate = PositionGate::new(Some(ReadingPosition::new(0, 5)));
        let ranked = retriever.retrieve(book_id, &gate, "what happened?").await.unwrap();

        assert!(!ranked.is_empty());
        assert_eq!(ranked[0].chunk.position_index, 3);
        for item in &ranked {
            assert!(item.chunk.chapter_index == 0 && item.chunk.position_index <= 5);
        }
    }

    #[tokio::test]
    async fn result_count_is_capped_at_top_k() {
        let (store, _dir, book_id) = seeded_store().await;
        let provider = MockProvider::new(vec![0.1f32; 20]);

        let retriever = Retriever::new(&store, &provider, "embed", 3, Duration::from_secs(5));
        let gate = PositionGate::new(Some(ReadingPosition::new(1, 9)));
        let ranked = retriever.retrieve(book_id, &gate, "q").await.unwrap();

        assert_eq!(ranked.len(), 3);
    }
}
