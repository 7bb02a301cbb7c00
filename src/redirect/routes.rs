use axum::{middleware, routing::get, Router};
use std::sync::Arc;

use crate::config::AnalyticsConfig;
use crate::resolver::RedirectResolver;

use super::handlers::{health_check, redirect_url, RedirectState};
use super::middleware::capture_request_context;

pub fn create_redirect_router(resolver: Arc<RedirectResolver>, analytics: AnalyticsConfig) -> Router {
    let state = Arc::new(RedirectState {
        resolver,
        analytics,
    });

    Router::new()
        .route("/", get(health_check))
        .route("/{code}", get(redirect_url))
        .layer(middleware::from_fn(capture_request_context))
        .with_state(state)
}
