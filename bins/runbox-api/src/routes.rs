use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/code/execute", post(handlers::execute_code))
        .route("/api/code/languages", get(handlers::get_languages))
        .route("/status", get(handlers::status))
        .route("/metrics", get(handlers::metrics))
}
