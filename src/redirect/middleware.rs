use axum::{
    body::Body,
    extract::ConnectInfo,
    http::Request,
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

/// Per-request facts captured before routing
#[derive(Copy, Clone, Debug)]
pub struct RequestContext {
    pub start: Instant,
    /// TCP peer, absent when the router is driven without a listener
    pub peer: Option<IpAddr>,
}

pub async fn capture_request_context(mut request: Request<Body>, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    request.extensions_mut().insert(RequestContext {
        start: Instant::now(),
        peer,
    });
    next.run(request).await
}
