use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::resolver::RedirectResolver;

use super::handlers::{
    create_link, delete_link, get_link_stats, health_check, list_links, submit_feedback, AppState,
};

pub fn create_api_router(resolver: Arc<RedirectResolver>) -> Router {
    let state = Arc::new(AppState { resolver });

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/links", post(create_link).get(list_links))
        .route("/api/links/{code}", get(get_link_stats).delete(delete_link))
        .route("/api/feedback", post(submit_feedback))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
