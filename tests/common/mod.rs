//! Common test utilities for Restream
//!
//! Shared fixtures for spinning up the application against an in-memory
//! store and scripted token sources, plus helpers for decoding SSE bodies.

#![allow(dead_code)]

use std::sync::Arc;

use axum_test::TestServer;
use futures::StreamExt;

use restream::routes::create_router;
use restream::source::TokenSource;
use restream::sse::{parse_data_line, SseLineBuffer, WireEvent};
use restream::store::{InMemoryStreamStore, StreamStore};
use restream::{AppState, Config};

/// Configuration used by every test state; never reads the environment
pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        redis_url: None,
        openai_api_url: "http://127.0.0.1:9".to_string(),
        openai_api_key: Some("test-key".to_string()),
        openai_model: "test-model".to_string(),
        stream_ttl_seconds: 300,
        subscription_capacity: 256,
    }
}

/// Application state backed by an in-memory store and the given source
pub fn durable_state(source: Arc<dyn TokenSource>) -> (Arc<InMemoryStreamStore>, Arc<AppState>) {
    let store = Arc::new(InMemoryStreamStore::new(256));
    let state = AppState::new_for_testing(
        test_config(),
        Some(store.clone() as Arc<dyn StreamStore>),
        source,
    );
    (store, Arc::new(state))
}

/// Application state with no backing store (passthrough mode)
pub fn passthrough_state(source: Arc<dyn TokenSource>) -> Arc<AppState> {
    Arc::new(AppState::new_for_testing(test_config(), None, source))
}

/// In-process test server over the full router
pub fn test_server(state: Arc<AppState>) -> TestServer {
    TestServer::new(create_router(state)).expect("Failed to create test server")
}

/// Bind the full router on an ephemeral port and return its base URL.
///
/// Needed for tests that read a response body incrementally or drop the
/// connection mid-stream; the in-process server buffers complete bodies.
pub async fn spawn_server(state: Arc<AppState>) -> String {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Listener has no local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Test server failed");
    });
    format!("http://{}", addr)
}

/// Everything decoded from one SSE body
#[derive(Debug, Default, PartialEq)]
pub struct SseTranscript {
    /// Text deltas in arrival order
    pub deltas: Vec<String>,
    /// Whether the `[DONE]` sentinel arrived
    pub done: bool,
    /// Terminal error message, if one arrived
    pub error: Option<String>,
}

impl SseTranscript {
    /// All delta text concatenated
    pub fn text(&self) -> String {
        self.deltas.concat()
    }
}

/// Decode a complete SSE body into a transcript
pub fn decode_sse(body: &str) -> SseTranscript {
    let mut transcript = SseTranscript::default();
    let mut buffer = SseLineBuffer::new();
    let mut lines = buffer.feed(body.as_bytes());
    if buffer.has_incomplete() {
        lines.push(buffer.remaining().to_string());
    }

    for line in lines {
        match parse_data_line(&line) {
            Some(WireEvent::Delta(text)) => transcript.deltas.push(text),
            Some(WireEvent::Done) => transcript.done = true,
            Some(WireEvent::Error(message)) => transcript.error = Some(message),
            None => {}
        }
    }
    transcript
}

/// Read a reqwest SSE response to completion and decode it
pub async fn collect_sse(response: reqwest::Response) -> SseTranscript {
    let mut transcript = SseTranscript::default();
    let mut buffer = SseLineBuffer::new();
    let mut bytes = response.bytes_stream();

    while let Some(chunk) = bytes.next().await {
        let chunk = chunk.expect("SSE transport error");
        for line in buffer.feed(&chunk) {
            match parse_data_line(&line) {
                Some(WireEvent::Delta(text)) => transcript.deltas.push(text),
                Some(WireEvent::Done) => transcript.done = true,
                Some(WireEvent::Error(message)) => transcript.error = Some(message),
                None => {}
            }
        }
    }
    transcript
}
