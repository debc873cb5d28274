use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::static_files::static_handler;
use super::state::AppState;

// UI Routes - the chat page and its assets
pub fn ui_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(handlers::ui::index_handler))
        .route("/static/{*path}", get(static_handler))
}

// API Routes - JSON endpoints used by the chat page
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Session
            .route("/login", post(handlers::api::login))
            .route("/logout", post(handlers::api::logout))

            // Conversation
            .route("/chat", post(handlers::api::chat))
            .route("/history", get(handlers::api::history))

            // Catalog and system status
            .route("/templates", get(handlers::api::list_templates))
            .route("/status", get(handlers::api::system_status)),
    )
}
