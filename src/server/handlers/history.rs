use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::{ApiError, EngineError};
use crate::session::DEFAULT_SESSION_ID;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SessionBody {
    #[serde(default)]
    pub session: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TurnsQuery {
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct JumpRequest {
    pub chunk_id: i64,
    #[serde(default)]
    pub session: Option<String>,
}

fn session_or_default(session: Option<String>) -> String {
    session.unwrap_or_else(|| DEFAULT_SESSION_ID.to_string())
}

pub async fn list_turns(
    State(state): State<Arc<AppState>>,
    Path(book_id): Path<i64>,
    Query(params): Query<TurnsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session_or_default(params.session);
    let limit = params.limit.unwrap_or(200).clamp(1, 1000);

    let turns = state
        .engine
        .turns(book_id, &session, limit)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(json!({ "turns": turns })))
}

/// Out-of-range navigation is an expected outcome, not an HTTP error:
/// it reports `available: false` and leaves the cursor where it was.
async fn navigate(
    result: Result<crate::library::types::QaTurn, EngineError>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match result {
        Ok(turn) => Ok(Json(json!({ "available": true, "turn": turn }))),
        Err(EngineError::HistoryNavigationUnavailable(_)) => {
            Ok(Json(json!({ "available": false, "turn": null })))
        }
        Err(err) => Err(ApiError::from(err)),
    }
}

pub async fn back(
    State(state): State<Arc<AppState>>,
    Path(book_id): Path<i64>,
    Json(payload): Json<SessionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session_or_default(payload.session);
    navigate(state.engine.history_back(book_id, &session).await).await
}

pub async fn forward(
    State(state): State<Arc<AppState>>,
    Path(book_id): Path<i64>,
    Json(payload): Json<SessionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session_or_default(payload.session);
    navigate(state.engine.history_forward(book_id, &session).await).await
}

pub async fn jump(
    State(state): State<Arc<AppState>>,
    Path(book_id): Path<i64>,
    Json(payload): Json<JumpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session_or_default(payload.session);
    let target = state
        .engine
        .jump_citation(book_id, &session, payload.chunk_id)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(json!({ "target": target })))
}

pub async fn return_from_jump(
    State(state): State<Arc<AppState>>,
    Path(book_id): Path<i64>,
    Json(payload): Json<SessionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session_or_default(payload.session);
    let position = state
        .engine
        .return_from_jump(book_id, &session)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(json!({ "position": position })))
}
