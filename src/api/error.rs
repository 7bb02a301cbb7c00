use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::error;

use crate::resolver::ResolveError;

/// Error body shared by the API and the redirect server
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    retry_after: Option<Duration>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after: None,
        }
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound => Self::new(StatusCode::NOT_FOUND, "Short URL not found"),
            ResolveError::Unauthorized => {
                Self::new(StatusCode::FORBIDDEN, "This link belongs to another owner")
            }
            ResolveError::InvalidUrl(reason) => {
                Self::new(StatusCode::BAD_REQUEST, format!("Invalid URL: {reason}"))
            }
            ResolveError::EmptyFeedback => {
                Self::new(StatusCode::BAD_REQUEST, "Feedback message cannot be empty")
            }
            ResolveError::FeedbackTooSoon { retry_after } => Self {
                status: StatusCode::TOO_MANY_REQUESTS,
                message: "Feedback can only be submitted once every 7 days".to_string(),
                retry_after: Some(retry_after),
            },
            ResolveError::BackingStoreUnavailable => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable",
            ),
            ResolveError::DuplicateCode => {
                error!("short code allocation exhausted its retry");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to allocate a short code")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            status: self.status.as_u16(),
            message: self.message,
        });

        let mut response = (self.status, body).into_response();
        if let Some(retry_after) = self.retry_after {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after.as_secs().max(1)),
            );
        }
        response
    }
}
