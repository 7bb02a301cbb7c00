//! Public redirect server

pub mod handlers;
mod middleware;
pub mod routes;

pub use routes::create_redirect_router;
