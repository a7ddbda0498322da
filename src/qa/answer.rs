//! Streaming answerer.
//!
//! Drives the completion provider and relays deltas to the caller,
//! finishing with exactly one terminal event. One stream per
//! (book, session): starting a new question fires the previous stream's
//! cancel channel, which stops the pump without retracting anything
//! already emitted. A cancelled turn gets no `Done` and never reaches
//! the history stack or the durable log.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;

use crate::core::errors::EngineError;
use crate::library::store::LibraryStore;
use crate::library::types::{QaTurn, ReadingPosition};
use crate::llm::{ChatRequest, LlmProvider};
use crate::qa::citation;
use crate::qa::context::AssembledContext;
use crate::session::{SessionContext, StreamHandle};

pub const NO_CONTENT_ANSWER: &str =
    "I don't have enough information from the text you've read so far.";

const ANSWER_TEMPERATURE: f64 = 0.2;

/// Incremental output of one answer stream. Deltas arrive in generation
/// order; nothing follows the terminal `Done`/`Error`.
#[derive(Debug, Clone)]
pub enum AnswerEvent {
    Delta(String),
    Done(QaTurn),
    Error(String),
}

/// Everything about the turn besides the assembled context.
#[derive(Debug, Clone)]
pub struct AnswerJob {
    pub book_id: i64,
    pub session_id: String,
    pub question: String,
    pub model: String,
    pub position_context: Option<ReadingPosition>,
}

pub struct StreamingAnswerer {
    provider: Arc<dyn LlmProvider>,
    store: LibraryStore,
    delta_timeout: Duration,
}

impl StreamingAnswerer {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        store: LibraryStore,
        delta_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            delta_timeout,
        }
    }

    /// Start streaming an answer. Cancels any stream still in flight for
    /// this session before the new one begins emitting.
    pub async fn start(
        &self,
        session: Arc<Mutex<SessionContext>>,
        job: AnswerJob,
        context: AssembledContext,
    ) -> Result<mpsc::Receiver<AnswerEvent>, EngineError> {
        let request =
            ChatRequest::new(context.messages.clone()).with_temperature(ANSWER_TEMPERATURE);

        let provider_rx = self
            .provider
            .stream_chat(request, &job.model)
            .await
            .map_err(|e| EngineError::AnswerGenerationFailed(e.to_string()))?;

        let (out_tx, out_rx) = mpsc::channel(32);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        session
            .lock()
            .await
            .replace_active_stream(StreamHandle::new(cancel_tx));

        let store = self.store.clone();
        let delta_timeout = self.delta_timeout;
        tokio::spawn(pump(
            provider_rx,
            out_tx,
            cancel_rx,
            session,
            store,
            job,
            context,
            delta_timeout,
        ));

        Ok(out_rx)
    }

    /// Complete a turn without consulting the model. Used when the
    /// admissible set is empty ("no content read yet"); a defined
    /// result, recorded like any other turn.
    pub async fn short_circuit(
        &self,
        session: Arc<Mutex<SessionContext>>,
        job: AnswerJob,
    ) -> Result<mpsc::Receiver<AnswerEvent>, EngineError> {
        let turn = QaTurn {
            question: job.question,
            answer_text: NO_CONTENT_ANSWER.to_string(),
            resolved_citations: Vec::new(),
            position_context: job.position_context,
            model: job.model,
            timestamp: Utc::now().to_rfc3339(),
        };

        self.store
            .save_turn(job.book_id, &job.session_id, &turn)
            .await?;
        {
            let mut guard = session.lock().await;
            guard.cancel_active();
            guard.history.push(turn.clone());
        }

        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(AnswerEvent::Done(turn)).await;
        Ok(rx)
    }
}

#[allow(clippy::too_many_arguments)]
async fn pump(
    mut provider_rx: mpsc::Receiver<Result<String, crate::core::errors::ApiError>>,
    out_tx: mpsc::Sender<AnswerEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
    session: Arc<Mutex<SessionContext>>,
    store: LibraryStore,
    job: AnswerJob,
    context: AssembledContext,
    delta_timeout: Duration,
) {
    let mut answer = String::new();

    loop {
        tokio::select! {
            biased;
            _ = &mut cancel_rx => {
                tracing::debug!("answer stream cancelled for book {}", job.book_id);
                return;
            }
            item = timeout(delta_timeout, provider_rx.recv()) => match item {
                Err(_) => {
                    let _ = out_tx
                        .send(AnswerEvent::Error("answer generation timed out".to_string()))
                        .await;
                    return;
                }
                Ok(None) => break,
                Ok(Some(Ok(delta))) => {
                    answer.push_str(&delta);
                    if out_tx.send(AnswerEvent::Delta(delta)).await.is_err() {
                        return;
                    }
                }
                Ok(Some(Err(err))) => {
                    tracing::warn!("completion failed mid-stream: {}", err);
                    let _ = out_tx.send(AnswerEvent::Error(err.to_string())).await;
                    return;
                }
            }
        }
    }

    // The provider finished; a cancel racing in at this point still wins.
    if cancel_rx.try_recv().is_ok() {
        tracing::debug!("answer stream cancelled at completion for book {}", job.book_id);
        return;
    }

    let trimmed = answer.trim();
    let resolution = if trimmed.is_empty() {
        citation::resolve(NO_CONTENT_ANSWER, &context.bindings)
    } else {
        citation::resolve(trimmed, &context.bindings)
    };

    let turn = QaTurn {
        question: job.question,
        answer_text: resolution.display_text,
        resolved_citations: resolution.citations,
        position_context: job.position_context,
        model: job.model,
        timestamp: Utc::now().to_rfc3339(),
    };

    if let Err(err) = store.save_turn(job.book_id, &job.session_id, &turn).await {
        tracing::warn!("failed to persist turn for book {}: {}", job.book_id, err);
        let _ = out_tx.send(AnswerEvent::Error(err.to_string())).await;
        return;
    }

    session.lock().await.history.push(turn.clone());
    let _ = out_tx.send(AnswerEvent::Done(turn)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::types::{Chunk, SourceLocation};
    use crate::llm::testing::{MockProvider, MockStream};
    use crate::qa::context::ContextAssembler;
    use crate::qa::retriever::RankedChunk;
    use crate::session::SessionManager;
    use tempfile::TempDir;

    struct Fixture {
        store: LibraryStore,
        _dir: TempDir,
        book_id: i64,
        session: Arc<Mutex<SessionContext>>,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = LibraryStore::new(dir.path().join("library.db"))
            .await
            .unwrap();
        let book_id = store.create_book("Book", "Author").await.unwrap();
        let session = SessionManager::new(40)
            .context(&store, book_id, "default")
            .await
            .unwrap();
        Fixture {
            store,
            _dir: dir,
            book_id,
            session,
        }
    }

    fn job(book_id: i64) -> AnswerJob {
        AnswerJob {
            book_id,
            session_id: "default".to_string(),
            question: "What happened?".to_string(),
            model: "test-model".to_string(),
            position_context: Some(ReadingPosition::new(0, 5)),
        }
    }

    fn context_with_chunk(chunk_id: i64) -> AssembledContext {
        let chunk = Chunk {
            chunk_id,
            book_id: 1,
            chapter_index: 0,
            chapter_title: None,
            position_index: 0,
            text: "excerpt text".to_string(),
            embedding: Vec::new(),
            source_location: SourceLocation {
                spine_href: Some("ch0.xhtml".to_string()),
                anchor_text: None,
            },
        };
        ContextAssembler::new(10_000).assemble(
            "What happened?",
            vec![RankedChunk { chunk, score: 0.9 }],
        )
    }

    async fn collect(mut rx: mpsc::Receiver<AnswerEvent>) -> Vec<AnswerEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn deltas_then_done_with_resolved_citations() {
        let f = fixture().await;
        let provider = Arc::new(
            MockProvider::new(Vec::new()).script(MockStream::Complete(vec![
                "The hero ".to_string(),
                "wins [c:9].".to_string(),
            ])),
        );
        let answerer =
            StreamingAnswerer::new(provider, f.store.clone(), Duration::from_secs(5));

        let rx = answerer
            .start(f.session.clone(), job(f.book_id), context_with_chunk(9))
            .await
            .unwrap();
        let events = collect(rx).await;

        assert!(matches!(events[0], AnswerEvent::Delta(ref d) if d == "The hero "));
        assert!(matches!(events[1], AnswerEvent::Delta(_)));
        let AnswerEvent::Done(turn) = &events[2] else {
            panic!("expected Done, got {:?}", events[2]);
        };
        assert_eq!(turn.answer_text, "The hero wins [1].");
        assert_eq!(turn.resolved_citations.len(), 1);
        assert_eq!(turn.resolved_citations[0].chunk_id, 9);

        assert_eq!(f.session.lock().await.history.len(), 1);
        let persisted = f.store.recent_turns(f.book_id, "default", 40).await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].answer_text, "The hero wins [1].");
    }

    #[tokio::test]
    async fn mid_stream_error_preserves_deltas_but_records_nothing() {
        let f = fixture().await;
        let provider = Arc::new(MockProvider::new(Vec::new()).script(MockStream::Error(
            vec!["partial ".to_string()],
            "provider exploded".to_string(),
        )));
        let answerer =
            StreamingAnswerer::new(provider, f.store.clone(), Duration::from_secs(5));

        let rx = answerer
            .start(f.session.clone(), job(f.book_id), context_with_chunk(9))
            .await
            .unwrap();
        let events = collect(rx).await;

        assert!(matches!(events[0], AnswerEvent::Delta(ref d) if d == "partial "));
        assert!(matches!(events.last(), Some(AnswerEvent::Error(_))));
        assert!(!events.iter().any(|e| matches!(e, AnswerEvent::Done(_))));

        assert!(f.session.lock().await.history.is_empty());
        assert!(f
            .store
            .recent_turns(f.book_id, "default", 40)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn new_question_cancels_the_extant_stream() {
        let f = fixture().await;
        let provider = Arc::new(
            MockProvider::new(Vec::new())
                .script(MockStream::Stall(vec!["first answer ".to_string()]))
                .script(MockStream::Complete(vec!["second answer".to_string()])),
        );
        let answerer =
            StreamingAnswerer::new(provider, f.store.clone(), Duration::from_secs(5));

        let mut first_rx = answerer
            .start(f.session.clone(), job(f.book_id), context_with_chunk(9))
            .await
            .unwrap();

        // The first stream has emitted a delta and is now stalled.
        let first_delta = first_rx.recv().await.unwrap();
        assert!(matches!(first_delta, AnswerEvent::Delta(ref d) if d == "first answer "));

        // Asking again on the same session supersedes the first stream.
        let second_rx = answerer
            .start(f.session.clone(), job(f.book_id), context_with_chunk(9))
            .await
            .unwrap();

        // The cancelled stream closes without a terminal event.
        let leftovers = collect(first_rx).await;
        assert!(!leftovers
            .iter()
            .any(|e| matches!(e, AnswerEvent::Done(_) | AnswerEvent::Error(_))));

        let second_events = collect(second_rx).await;
        assert!(matches!(second_events.last(), Some(AnswerEvent::Done(_))));

        // Only the completed turn exists anywhere.
        assert_eq!(f.session.lock().await.history.len(), 1);
        let persisted = f.store.recent_turns(f.book_id, "default", 40).await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].answer_text, "second answer");
    }

    #[tokio::test]
    async fn stalled_provider_times_out_as_a_failed_turn() {
        let f = fixture().await;
        let provider =
            Arc::new(MockProvider::new(Vec::new()).script(MockStream::Stall(Vec::new())));
        let answerer =
            StreamingAnswerer::new(provider, f.store.clone(), Duration::from_millis(50));

        let rx = answerer
            .start(f.session.clone(), job(f.book_id), context_with_chunk(9))
            .await
            .unwrap();
        let events = collect(rx).await;

        assert!(matches!(events.last(), Some(AnswerEvent::Error(ref m)) if m.contains("timed out")));
        assert!(f.session.lock().await.history.is_empty());
    }

    #[tokio::test]
    async fn short_circuit_records_a_no_content_turn() {
        let f = fixture().await;
        let provider = Arc::new(MockProvider::new(Vec::new()));
        let answerer =
            StreamingAnswerer::new(provider, f.store.clone(), Duration::from_secs(5));

        let rx = answerer
            .short_circuit(f.session.clone(), job(f.book_id))
            .await
            .unwrap();
        let events = collect(rx).await;

        assert_eq!(events.len(), 1);
        let AnswerEvent::Done(turn) = &events[0] else {
            panic!("expected Done");
        };
        assert_eq!(turn.answer_text, NO_CONTENT_ANSWER);
        assert!(turn.resolved_citations.is_empty());
        assert_eq!(f.session.lock().await.history.len(), 1);
    }
}
