use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers::{books, health, history, query};
use crate::state::AppState;

/// Creates the application router: CORS, request tracing, the book
/// catalog, and the reading-companion operations.
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route(
            "/api/books",
            get(books::list_books).post(books::create_book),
        )
        .route(
            "/api/books/:book_id",
            get(books::get_book).delete(books::delete_book),
        )
        .route("/api/books/:book_id/position", post(books::set_position))
        .route("/api/books/:book_id/search", get(books::search_book))
        .route("/api/books/:book_id/ask", post(query::ask))
        .route("/api/books/:book_id/turns", get(history::list_turns))
        .route("/api/books/:book_id/history/back", post(history::back))
        .route(
            "/api/books/:book_id/history/forward",
            post(history::forward),
        )
        .route("/api/books/:book_id/jump", post(history::jump))
        .route(
            "/api/books/:book_id/return",
            post(history::return_from_jump),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}
