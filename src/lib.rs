pub mod analytics;
pub mod api;
pub mod auth;
pub mod cache;
pub mod codegen;
pub mod config;
pub mod models;
pub mod redirect;
pub mod resolver;
pub mod storage;
