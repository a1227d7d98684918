//! HTTP surface: conversion endpoints, health, and response logging.

pub mod error;
pub mod handlers;
mod middleware;
pub mod models;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use crate::{application::render::RenderPipeline, domain::EngineVersion};

pub use error::ApiError;
pub use middleware::{RequestContext, log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub pipeline: Arc<RenderPipeline>,
    pub default_version: EngineVersion,
}

impl HttpState {
    pub fn new(pipeline: RenderPipeline, default_version: EngineVersion) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            default_version,
        }
    }
}

pub fn build_router(state: HttpState, max_request_bytes: usize) -> Router {
    Router::new()
        .route("/convert", post(handlers::convert_text))
        .route("/convert/txt", post(handlers::convert_txt_file))
        .route("/convert/binary", post(handlers::convert_binary))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
        .layer(CorsLayer::very_permissive())
}
