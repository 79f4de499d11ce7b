//! OpenAPI specification for the streaming API
//!
//! Aggregates the public endpoints and schemas into a single OpenAPI
//! document, served alongside a Swagger UI page that loads its assets from
//! the unpkg CDN to avoid bundling static files.

use axum::{
    response::Html,
    routing::get,
    Json, Router,
};
use utoipa::OpenApi;

use crate::routes::chat::ChatRequest;
use crate::source::ChatMessage;
use crate::sse::StreamDelta;

/// OpenAPI specification for the Restream API
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Restream API",
        version = "1.0.0",
        description = "Resumable chat stream engine: start a generation as SSE, resume it after a disconnect from any char offset"
    ),
    paths(
        crate::routes::chat::start_chat,
        crate::routes::chat::resume_chat,
    ),
    components(schemas(ChatMessage, ChatRequest, StreamDelta)),
    tags(
        (name = "Chat", description = "Streaming generation endpoints")
    )
)]
pub struct ApiDoc;

/// Handler for OpenAPI JSON endpoint
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Handler for Swagger UI HTML
async fn swagger_ui() -> Html<&'static str> {
    Html(SWAGGER_UI_HTML)
}

/// Create the docs router
///
/// Routes:
/// - GET /docs - Swagger UI
/// - GET /docs/openapi.json - Raw OpenAPI spec
pub fn create_docs_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/docs", get(swagger_ui))
        .route("/docs/openapi.json", get(openapi_json))
}

/// Swagger UI page backed by CDN assets
const SWAGGER_UI_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Restream API - Documentation</title>
    <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
    <style>
        html { box-sizing: border-box; overflow-y: scroll; }
        *, *:before, *:after { box-sizing: inherit; }
        body { margin: 0; background: #fafafa; }
    </style>
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script>
        window.onload = function() {
            window.ui = SwaggerUIBundle({
                url: "/docs/openapi.json",
                dom_id: '#swagger-ui',
                deepLinking: true,
                presets: [SwaggerUIBundle.presets.apis],
            });
        };
    </script>
</body>
</html>"#;
