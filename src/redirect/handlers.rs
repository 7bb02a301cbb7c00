use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;
use tracing::{debug, error};

use super::middleware::RequestContext;
use crate::analytics::extract_client_ip;
use crate::api::{handlers::HealthResponse, ApiError};
use crate::config::AnalyticsConfig;
use crate::resolver::{RedirectResolver, Visitor};

pub struct RedirectState {
    pub resolver: Arc<RedirectResolver>,
    pub analytics: AnalyticsConfig,
}

/// Redirect to the original URL with a 302
pub async fn redirect_url(
    State(state): State<Arc<RedirectState>>,
    Path(code): Path<String>,
    Extension(context): Extension<RequestContext>,
    headers: HeaderMap,
) -> Response {
    let visitor = Visitor {
        ip: context
            .peer
            .map(|peer| extract_client_ip(&headers, peer, &state.analytics)),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
            .to_string(),
    };

    let url = match state.resolver.resolve(&code, visitor).await {
        Ok(url) => url,
        Err(e) => return ApiError::from(e).into_response(),
    };

    let location = match HeaderValue::from_str(&url) {
        Ok(location) => location,
        Err(e) => {
            error!(short_code = %code, error = %e, "stored URL is not a valid Location header");
            return ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                .into_response();
        }
    };

    debug!(
        short_code = %code,
        elapsed_us = context.start.elapsed().as_micros() as u64,
        "redirect served"
    );

    (
        StatusCode::FOUND,
        [
            (header::LOCATION, location),
            // Every visit must reach us to be counted
            (header::CACHE_CONTROL, HeaderValue::from_static("private, max-age=0")),
        ],
    )
        .into_response()
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "up",
        version: env!("CARGO_PKG_VERSION"),
    })
}
