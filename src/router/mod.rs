//! HTTP surface (spec.md §6): wires the five endpoints onto [`AppState`].

mod filters;
mod handlers;
mod query;
mod state;

pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

/// Builds the gateway's axum [`Router`] over a shared [`AppState`].
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/recommend-items/:ns/:rec/:user_id", get(handlers::recommend_items))
        .route("/related-items/:ns/:rec/:item_id", get(handlers::related_items))
        .route(
            "/rerank-items/:ns/:rec/:user_id/:item_ids",
            get(handlers::rerank_items_path),
        )
        .route("/rerank-items/:ns/:rec/:user_id", post(handlers::rerank_items_body))
        .route("/events/:ns", post(handlers::events))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
