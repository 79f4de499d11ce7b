//! HTTP routes for Restream
//!
//! This module defines all HTTP endpoints exposed by the server.

pub mod chat;
pub mod health;
pub mod metrics;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{docs::create_docs_router, AppState};

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS configuration: the resume flow runs from browser tabs that may
    // reload on any origin, and it must be able to read the stream headers
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    let api_routes = Router::new()
        .route("/api/chat", post(chat::start_chat))
        .route("/api/chat/resume", get(chat::resume_chat));

    // Health checks and metrics
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check))
        .route("/health/live", get(health::liveness_check))
        .route("/metrics", get(metrics::prometheus_metrics));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .merge(create_docs_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
