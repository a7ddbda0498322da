//! The ask endpoint: streams one answer as newline-delimited JSON.
//!
//! Line protocol: `{"type":"delta","delta":...}` per increment, then one
//! terminal `{"type":"done","data":{...}}` or `{"type":"error","error":...}`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::qa::AnswerEvent;
use crate::session::DEFAULT_SESSION_ID;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub session: Option<String>,
}

pub async fn ask(
    State(state): State<Arc<AppState>>,
    Path(book_id): Path<i64>,
    Json(payload): Json<AskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let question = payload.question.trim().to_string();
    if question.is_empty() {
        return Err(ApiError::BadRequest("question is required".to_string()));
    }
    let session = payload
        .session
        .unwrap_or_else(|| DEFAULT_SESSION_ID.to_string());

    let rx = state
        .engine
        .ask(book_id, &session, &question)
        .await
        .map_err(ApiError::from)?;

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok::<_, Infallible>(event_line(&event)), rx))
    });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    ))
}

fn event_line(event: &AnswerEvent) -> String {
    let value = match event {
        AnswerEvent::Delta(delta) => json!({ "type": "delta", "delta": delta }),
        AnswerEvent::Done(turn) => json!({
            "type": "done",
            "data": {
                "answer": turn.answer_text,
                "sources": turn.resolved_citations,
                "position_context": turn.position_context,
                "model": turn.model,
                "timestamp": turn.timestamp,
            }
        }),
        AnswerEvent::Error(message) => json!({ "type": "error", "error": message }),
    };
    let mut line = value.to_string();
    line.push('\n');
    line
}
