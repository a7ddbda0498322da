//! Per-(book, session) mutable state.
//!
//! Every operation that touches position caches, stacks, or the active
//! stream goes through one `SessionContext` behind an async mutex, so
//! concurrent writers for the same pair serialize while other sessions'
//! streams run untouched.

pub mod history;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::core::errors::EngineError;
use crate::library::store::LibraryStore;

pub use history::{HistoryStack, ReturnStack};

pub const DEFAULT_SESSION_ID: &str = "default";

type SessionKey = (i64, String);

/// Cancellation handle for the one in-flight answer stream of a session.
#[derive(Debug)]
pub struct StreamHandle {
    cancel: oneshot::Sender<()>,
}

impl StreamHandle {
    pub fn new(cancel: oneshot::Sender<()>) -> Self {
        Self { cancel }
    }

    fn cancel(self) {
        // The pump may already have finished; a dead receiver is fine.
        let _ = self.cancel.send(());
    }
}

pub struct SessionContext {
    pub history: HistoryStack,
    pub returns: ReturnStack,
    active: Option<StreamHandle>,
}

impl SessionContext {
    fn new(cap: usize) -> Self {
        Self {
            history: HistoryStack::new(cap),
            returns: ReturnStack::new(cap),
            active: None,
        }
    }

    /// Install the handle for a newly started stream, cancelling any
    /// stream still in flight for this session.
    pub fn replace_active_stream(&mut self, handle: StreamHandle) {
        if let Some(previous) = self.active.replace(handle) {
            tracing::debug!("cancelling superseded answer stream");
            previous.cancel();
        }
    }

    /// Cancel the in-flight stream, if any, without starting a new one.
    pub fn cancel_active(&mut self) {
        if let Some(previous) = self.active.take() {
            tracing::debug!("cancelling superseded answer stream");
            previous.cancel();
        }
    }
}

pub struct SessionManager {
    sessions: Mutex<HashMap<SessionKey, Arc<Mutex<SessionContext>>>>,
    cap: usize,
}

impl SessionManager {
    pub fn new(cap: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            cap,
        }
    }

    /// Fetch the context for a (book, session) pair, hydrating the
    /// history stack from the durable turn log on first touch.
    pub async fn context(
        &self,
        store: &LibraryStore,
        book_id: i64,
        session_id: &str,
    ) -> Result<Arc<Mutex<SessionContext>>, EngineError> {
        let key = (book_id, session_id.to_string());

        {
            let sessions = self.sessions.lock().await;
            if let Some(context) = sessions.get(&key) {
                return Ok(context.clone());
            }
        }

        let turns = store
            .recent_turns(book_id, session_id, self.cap as i64)
            .await?;

        let mut sessions = self.sessions.lock().await;
        // Another caller may have hydrated while we read the log.
        let context = sessions
            .entry(key)
            .or_insert_with(|| {
                let mut fresh = SessionContext::new(self.cap);
                fresh.history.hydrate(turns);
                Arc::new(Mutex::new(fresh))
            })
            .clone();

        Ok(context)
    }

    /// Drop every session for a deleted book.
    pub async fn forget_book(&self, book_id: i64) {
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|(book, _), _| *book != book_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::types::QaTurn;
    use tempfile::TempDir;

    fn turn(label: &str) -> QaTurn {
        QaTurn {
            question: label.to_string(),
            answer_text: String::new(),
            resolved_citations: Vec::new(),
            position_context: None,
            model: "test".to_string(),
            timestamp: String::new(),
        }
    }

    #[tokio::test]
    async fn context_hydrates_from_the_durable_log() {
        let dir = TempDir::new().unwrap();
        let store = LibraryStore::new(dir.path().join("library.db"))
            .await
            .unwrap();
        let book_id = store.create_book("Book", "Author").await.unwrap();
        for i in 0..3 {
            store
                .save_turn(book_id, DEFAULT_SESSION_ID, &turn(&format!("q{i}")))
                .await
                .unwrap();
        }

        let manager = SessionManager::new(40);
        let context = manager
            .context(&store, book_id, DEFAULT_SESSION_ID)
            .await
            .unwrap();

        let guard = context.lock().await;
        assert_eq!(guard.history.len(), 3);
        assert_eq!(guard.history.current().unwrap().question, "q2");
    }

    #[tokio::test]
    async fn contexts_are_scoped_per_book_and_session() {
        let dir = TempDir::new().unwrap();
        let store = LibraryStore::new(dir.path().join("library.db"))
            .await
            .unwrap();
        let book_id = store.create_book("Book", "Author").await.unwrap();

        let manager = SessionManager::new(40);
        let a = manager.context(&store, book_id, "a").await.unwrap();
        let b = manager.context(&store, book_id, "b").await.unwrap();
        let a_again = manager.context(&store, book_id, "a").await.unwrap();

        assert!(Arc::ptr_eq(&a, &a_again));
        assert!(!Arc::ptr_eq(&a, &b));

        a.lock().await.history.push(turn("only in a"));
        assert!(b.lock().await.history.is_empty());
    }

    #[tokio::test]
    async fn forget_book_drops_its_sessions() {
        let dir = TempDir::new().unwrap();
        let store = LibraryStore::new(dir.path().join("library.db"))
            .await
            .unwrap();
        let book_id = store.create_book("Book", "Author").await.unwrap();

        let manager = SessionManager::new(40);
        let context = manager
            .context(&store, book_id, DEFAULT_SESSION_ID)
            .await
            .unwrap();
        context.lock().await.history.push(turn("ephemeral"));

        manager.forget_book(book_id).await;

        let fresh = manager
            .context(&store, book_id, DEFAULT_SESSION_ID)
            .await
            .unwrap();
        assert!(fresh.lock().await.history.is_empty());
    }
}
