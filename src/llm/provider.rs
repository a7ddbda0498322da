use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::ChatRequest;
use crate::core::errors::ApiError;

/// External language-model capability: completions (streaming) and
/// embeddings. Both ingest-time and query-time embedding go through the
/// same provider so vectors always share one embedding space.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g. "openai").
    fn name(&self) -> &str;

    /// Check if the provider is reachable.
    async fn health_check(&self) -> Result<bool, ApiError>;

    /// Streaming chat completion. The receiver yields text deltas in
    /// generation order and closes after the final delta; a mid-stream
    /// failure is delivered as an `Err` item and ends the stream.
    async fn stream_chat(
        &self,
        request: ChatRequest,
        model_id: &str,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError>;

    /// Generate embeddings, one vector per input, in input order.
    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Vec<Vec<f32>>, ApiError>;
}
