pub mod openai;
pub mod provider;
pub mod types;

pub use openai::OpenAiProvider;
pub use provider::LlmProvider;
pub use types::{ChatMessage, ChatRequest};

#[cfg(test)]
pub mod testing {
    //! Scriptable in-process provider for tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::provider::LlmProvider;
    use super::types::ChatRequest;
    use crate::core::errors::ApiError;

    /// What one `stream_chat` call should do.
    #[derive(Debug, Clone)]
    pub enum MockStream {
        /// Emit the deltas, then close the channel normally.
        Complete(Vec<String>),
        /// Emit the deltas, then fail mid-stream.
        Error(Vec<String>, String),
        /// Emit the deltas, then hold the stream open until the consumer
        /// goes away. Used to exercise cancellation.
        Stall(Vec<String>),
    }

    pub struct MockProvider {
        scripts: Mutex<VecDeque<MockStream>>,
        query_embedding: Vec<f32>,
        fail_embed: bool,
    }

    impl MockProvider {
        pub fn new(query_embedding: Vec<f32>) -> Self {
            Self {
                scripts: Mutex::new(VecDeque::new()),
                query_embedding,
                fail_embed: false,
            }
        }

        pub fn failing_embed() -> Self {
            Self {
                scripts: Mutex::new(VecDeque::new()),
                query_embedding: Vec::new(),
                fail_embed: true,
            }
        }

        pub fn script(self, stream: MockStream) -> Self {
            self.scripts
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push_back(stream);
            self
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn health_check(&self) -> Result<bool, ApiError> {
            Ok(true)
        }

        async fn stream_chat(
            &self,
            _request: ChatRequest,
            _model_id: &str,
        ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
            let script = self
                .scripts
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
                .unwrap_or_else(|| MockStream::Complete(vec!["unscripted".to_string()]));

            let (tx, rx) = mpsc::channel(32);
            tokio::spawn(async move {
                let (deltas, tail) = match script {
                    MockStream::Complete(deltas) => (deltas, None),
                    MockStream::Error(deltas, message) => (deltas, Some(message)),
                    MockStream::Stall(deltas) => {
                        for delta in deltas {
                            if tx.send(Ok(delta)).await.is_err() {
                                return;
                            }
                            tokio::time::sleep(Duration::from_millis(5)).await;
                        }
                        // Keep the producer end alive until the consumer
                        // drops its receiver.
                        tx.closed().await;
                        return;
                    }
                };

                for delta in deltas {
                    if tx.send(Ok(delta)).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                if let Some(message) = tail {
                    let _ = tx.send(Err(ApiError::ServiceUnavailable(message))).await;
                }
            });

            Ok(rx)
        }

        async fn embed(
            &self,
            inputs: &[String],
            _model_id: &str,
        ) -> Result<Vec<Vec<f32>>, ApiError> {
            if self.fail_embed {
                return Err(ApiError::ServiceUnavailable(
                    "mock embedding offline".to_string(),
                ));
            }
            Ok(inputs.iter().map(|_| self.query_embedding.clone()).collect())
        }
    }
}
