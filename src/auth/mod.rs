//! Owner identity for the owner-facing API.
//!
//! The front end that talks to this API (a chat bot, an admin panel) has
//! already authenticated the user and passes their numeric id in the
//! `X-Owner-Id` header. Requests without a usable id are rejected.

use axum::{extract::FromRequestParts, http::request::Parts, http::StatusCode};

use crate::api::ApiError;

pub const OWNER_HEADER: &str = "x-owner-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerId(pub i64);

impl OwnerId {
    pub fn from_header_value(raw: &str) -> Option<Self> {
        raw.trim().parse::<i64>().ok().map(OwnerId)
    }
}

impl<S> FromRequestParts<S> for OwnerId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|h| h.to_str().ok())
            .and_then(OwnerId::from_header_value)
            .ok_or_else(|| {
                ApiError::new(
                    StatusCode::UNAUTHORIZED,
                    "Missing or invalid X-Owner-Id header",
                )
            })
    }
}
