//! Chat streaming endpoints
//!
//! The start endpoint binds a token source to the stream registry and
//! forwards the generation as SSE; the resume endpoint replays a durable
//! stream from a char offset and then tails it live.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::AppError,
    registry::{EventStream, StreamEvent, StreamStatus},
    routes::metrics::{record_chunks, record_resume, record_stream_started},
    source::ChatMessage,
    sse::{format_data_event, format_done, format_error_event, StreamDelta},
    AppState,
};

/// Response header carrying the durable stream id (empty when durability is
/// unavailable)
pub const STREAM_ID_HEADER: &str = "X-Stream-Id";

/// Response header echoing or allocating the conversation id
pub const CONVERSATION_ID_HEADER: &str = "X-Conversation-Id";

/// Start request body
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ChatRequest {
    /// Conversation history, oldest first
    pub messages: Vec<ChatMessage>,
    /// Client-supplied conversation id; allocated by the server when absent
    #[serde(default, rename = "conversationId")]
    pub conversation_id: Option<String>,
}

/// Resume query parameters
#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ResumeParams {
    /// Id of the stream to resume
    #[serde(rename = "streamId")]
    pub stream_id: Option<String>,
    /// Chars already held by the client; invalid values count as 0
    #[serde(rename = "skipChars")]
    pub skip_chars: Option<String>,
}

/// Start a new generation stream
///
/// Responds with `text/event-stream`: JSON text deltas terminated by
/// `data: [DONE]`. The `X-Stream-Id` header names the durable record to
/// resume from; it is empty when no backing store is configured.
#[utoipa::path(
    post,
    path = "/api/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "SSE stream of text deltas", content_type = "text/event-stream"),
        (status = 400, description = "Empty message history"),
        (status = 502, description = "Token source rejected the request"),
    ),
    tag = "Chat"
)]
pub async fn start_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, AppError> {
    let started = Instant::now();

    if request.messages.is_empty() {
        return Err(AppError::BadRequest("messages must not be empty".to_string()));
    }

    let conversation_id = request
        .conversation_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let tokens = state
        .token_source
        .stream_completion(request.messages)
        .await?;

    let (stream_id, events) = state.registry.create_stream(tokens).await;

    let durable = !stream_id.is_empty();
    record_stream_started(durable, started.elapsed().as_secs_f64());
    info!(
        stream_id = %stream_id,
        conversation_id = %conversation_id,
        durable = durable,
        "Started generation stream"
    );

    sse_response(events, "live", &stream_id, &conversation_id)
}

/// Resume an existing stream
///
/// `204 No Content` means there is nothing to resume: the stream is unknown,
/// expired, already done, or durability is unavailable. The client should
/// stop waiting, not treat it as a failure.
#[utoipa::path(
    get,
    path = "/api/chat/resume",
    params(ResumeParams),
    responses(
        (status = 200, description = "SSE replay then live tail", content_type = "text/event-stream"),
        (status = 204, description = "Nothing to resume"),
        (status = 400, description = "Missing streamId"),
    ),
    tag = "Chat"
)]
pub async fn resume_chat(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ResumeParams>,
) -> Result<Response, AppError> {
    let stream_id = params
        .stream_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("streamId is required".to_string()))?;

    let skip_chars: u64 = params
        .skip_chars
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    match state.registry.has_existing_stream(&stream_id).await {
        None => {
            record_resume("not_found");
            info!(stream_id = %stream_id, "Resume requested for unknown or expired stream");
            return Ok(StatusCode::NO_CONTENT.into_response());
        }
        Some(StreamStatus::Done) => {
            record_resume("already_done");
            info!(stream_id = %stream_id, "Resume requested for finished stream");
            return Ok(StatusCode::NO_CONTENT.into_response());
        }
        Some(StreamStatus::Pending) => {}
    }

    match state
        .registry
        .resume_existing_stream(&stream_id, skip_chars)
        .await
    {
        Some(events) => {
            record_resume("replaying");
            info!(stream_id = %stream_id, skip_chars, "Resuming stream");
            sse_response(events, "replay", &stream_id, "")
        }
        None => {
            // Status flipped or the store went away between lookup and
            // subscribe; either way there is nothing to replay
            record_resume("unavailable");
            warn!(stream_id = %stream_id, "Stream vanished between lookup and resume");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

/// Build an SSE response from a registry event stream
fn sse_response(
    events: EventStream,
    path: &'static str,
    stream_id: &str,
    conversation_id: &str,
) -> Result<Response, AppError> {
    let frames = events.map(move |event| {
        Ok::<Bytes, Infallible>(match event {
            StreamEvent::Delta(text) => {
                record_chunks(path, 1);
                format_data_event(&StreamDelta { text })
            }
            StreamEvent::Error(message) => format_error_event(&message),
            StreamEvent::Done => format_done(),
        })
    });

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .header(STREAM_ID_HEADER, stream_id);

    if !conversation_id.is_empty() {
        builder = builder.header(CONVERSATION_ID_HEADER, conversation_id);
    }

    builder
        .body(Body::from_stream(frames))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build response: {}", e)))
}
