use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::engine::PositionUpdate;
use crate::library::types::ChapterDraft;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateBookRequest {
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    pub chapters: Vec<ChapterDraft>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn list_books(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let books = state.engine.store().list_books().await.map_err(ApiError::from)?;
    Ok(Json(json!({ "books": books })))
}

pub async fn create_book(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateBookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("title is required".to_string()));
    }
    if payload.chapters.is_empty() {
        return Err(ApiError::BadRequest(
            "at least one chapter is required".to_string(),
        ));
    }

    let author = payload.author.as_deref().unwrap_or("Unknown");
    let summary = state
        .engine
        .create_book(title, author, &payload.chapters)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(json!({ "book": summary })))
}

pub async fn get_book(
    State(state): State<Arc<AppState>>,
    Path(book_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let book = state
        .engine
        .store()
        .require_book(book_id)
        .await
        .map_err(ApiError::from)?;
    let position = state.engine.position(book_id).await.map_err(ApiError::from)?;

    Ok(Json(json!({ "book": book, "current_position": position })))
}

pub async fn delete_book(
    State(state): State<Arc<AppState>>,
    Path(book_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.engine.delete_book(book_id).await.map_err(ApiError::from)?;
    if !deleted {
        return Err(ApiError::NotFound(format!("book {book_id} not found")));
    }
    Ok(Json(json!({ "ok": true })))
}

pub async fn set_position(
    State(state): State<Arc<AppState>>,
    Path(book_id): Path<i64>,
    Json(payload): Json<PositionUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let position = state
        .engine
        .set_position(book_id, payload)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(json!({ "book_id": book_id, "position": position })))
}

pub async fn search_book(
    State(state): State<Arc<AppState>>,
    Path(book_id): Path<i64>,
    Query(params): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let query = params.q.trim().to_string();
    if query.len() < 2 {
        return Err(ApiError::BadRequest(
            "search query must be at least 2 characters".to_string(),
        ));
    }
    let limit = params.limit.unwrap_or(40).clamp(1, 200);

    let matches = state
        .engine
        .search(book_id, &query, limit)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(json!({ "query": query, "matches": matches })))
}
