//! API documentation module
//!
//! Provides OpenAPI specification generation using utoipa and serves a
//! CDN-backed Swagger UI.

mod openapi;

pub use openapi::{create_docs_router, ApiDoc};
