use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use super::error::ApiError;
use crate::auth::OwnerId;
use crate::models::{CreateLinkRequest, Feedback, FeedbackRequest, Link};
use crate::resolver::RedirectResolver;

pub struct AppState {
    pub resolver: Arc<RedirectResolver>,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Shorten a URL for the calling owner
pub async fn create_link(
    State(state): State<Arc<AppState>>,
    OwnerId(owner_id): OwnerId,
    Json(payload): Json<CreateLinkRequest>,
) -> Result<(StatusCode, Json<Link>), ApiError> {
    let link = state.resolver.shorten(owner_id, &payload.url).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

/// All links created by the calling owner
pub async fn list_links(
    State(state): State<Arc<AppState>>,
    OwnerId(owner_id): OwnerId,
) -> Result<Json<Vec<Link>>, ApiError> {
    Ok(Json(state.resolver.links_for_owner(owner_id).await?))
}

/// Click statistics for one link
pub async fn get_link_stats(
    State(state): State<Arc<AppState>>,
    OwnerId(owner_id): OwnerId,
    Path(code): Path<String>,
) -> Result<Json<Link>, ApiError> {
    Ok(Json(state.resolver.stats(&code, owner_id).await?))
}

pub async fn delete_link(
    State(state): State<Arc<AppState>>,
    OwnerId(owner_id): OwnerId,
    Path(code): Path<String>,
) -> Result<(StatusCode, Json<DeleteResponse>), ApiError> {
    let deleted = state.resolver.delete(&code, owner_id).await?;
    let status = if deleted {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    Ok((status, Json(DeleteResponse { deleted })))
}

pub async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    OwnerId(owner_id): OwnerId,
    Json(payload): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<Feedback>), ApiError> {
    let feedback = state
        .resolver
        .submit_feedback(owner_id, &payload.message)
        .await?;
    Ok((StatusCode::CREATED, Json(feedback)))
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "up",
        version: env!("CARGO_PKG_VERSION"),
    })
}
