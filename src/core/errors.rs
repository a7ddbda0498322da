use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Failures of the retrieval/answer engine, scoped to one turn or one
/// navigation request. Nothing here is fatal to the process.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Embedding or vector search capability unreachable or timed out.
    /// Surfaced to the caller; never downgraded to an unfiltered search.
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),
    /// Completion capability failed mid-stream. Already-emitted deltas
    /// stand; the turn is marked failed and not recorded.
    #[error("answer generation failed: {0}")]
    AnswerGenerationFailed(String),
    /// The reader has not reached any text yet. A defined empty result,
    /// not a failure.
    #[error("no content read yet")]
    NoContentReadYet,
    #[error("history navigation unavailable: {0}")]
    HistoryNavigationUnavailable(&'static str),
    #[error("ingest already in progress for this book")]
    IngestInProgress,
    #[error("book {0} not found")]
    BookNotFound(i64),
    #[error("chapter {0} not found")]
    ChapterNotFound(i64),
    #[error("chunk {0} not found")]
    ChunkNotFound(i64),
    #[error("invalid position update: {0}")]
    InvalidPosition(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn storage<E: std::fmt::Display>(err: E) -> Self {
        EngineError::Storage(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::RetrievalUnavailable(msg) => ApiError::ServiceUnavailable(msg),
            EngineError::AnswerGenerationFailed(msg) => ApiError::ServiceUnavailable(msg),
            EngineError::NoContentReadYet => {
                ApiError::BadRequest("no content read yet".to_string())
            }
            EngineError::HistoryNavigationUnavailable(which) => {
                ApiError::BadRequest(format!("history navigation unavailable: {which}"))
            }
            EngineError::IngestInProgress => {
                ApiError::Conflict("ingest already in progress for this book".to_string())
            }
            EngineError::BookNotFound(id) => ApiError::NotFound(format!("book {id} not found")),
            EngineError::ChapterNotFound(idx) => {
                ApiError::NotFound(format!("chapter {idx} not found"))
            }
            EngineError::ChunkNotFound(id) => ApiError::NotFound(format!("chunk {id} not found")),
            EngineError::InvalidPosition(msg) => {
                ApiError::BadRequest(format!("invalid position update: {msg}"))
            }
            EngineError::Storage(msg) => ApiError::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}
