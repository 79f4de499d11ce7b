//! Resume endpoint integration tests
//!
//! The contract under test: 400 without a streamId, 204 when there is
//! nothing to recover, otherwise a replay of the durable buffer past the
//! client's offset followed by a live tail of the still-running generation.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::json;

use restream::routes::chat::STREAM_ID_HEADER;
use restream::source::{ChannelSource, ScriptedSource};

use crate::common::{
    collect_sse, decode_sse, durable_state, passthrough_state, spawn_server, test_server,
};

fn chat_body() -> serde_json::Value {
    json!({
        "messages": [{ "role": "user", "content": "hello" }]
    })
}

/// Start a generation over HTTP and return its stream id, leaving the
/// response body unread so the generation is only attached to the pump.
async fn start_stream(client: &reqwest::Client, base: &str) -> String {
    let response = client
        .post(format!("{}/api/chat", base))
        .json(&chat_body())
        .send()
        .await
        .expect("start request failed");
    assert!(response.status().is_success());
    response
        .headers()
        .get(STREAM_ID_HEADER)
        .expect("missing stream id header")
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_resume_requires_stream_id() {
    let (_store, state) = durable_state(Arc::new(ScriptedSource::new(["ok"])));
    let server = test_server(state);

    let response = server.get("/api/chat/resume").await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let response = server
        .get("/api/chat/resume")
        .add_query_param("streamId", "")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_resume_unknown_stream_is_204() {
    let (_store, state) = durable_state(Arc::new(ScriptedSource::new(["ok"])));
    let server = test_server(state);

    let response = server
        .get("/api/chat/resume")
        .add_query_param("streamId", "no-such-stream")
        .add_query_param("skipChars", "0")
        .await;
    response.assert_status(StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_resume_finished_stream_is_204() {
    let (_store, state) = durable_state(Arc::new(ScriptedSource::new(["Hi", "!"])));
    let server = test_server(state);

    let response = server.post("/api/chat").json(&chat_body()).await;
    response.assert_status_ok();
    assert!(decode_sse(&response.text()).done);

    let stream_id = response
        .headers()
        .get(STREAM_ID_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    // Terminal detection: once [DONE] has been recorded there is nothing
    // left to resume, whatever offset the client still holds
    let response = server
        .get("/api/chat/resume")
        .add_query_param("streamId", &stream_id)
        .add_query_param("skipChars", "0")
        .await;
    response.assert_status(StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_resume_in_passthrough_mode_is_204() {
    let state = passthrough_state(Arc::new(ScriptedSource::new(["ok"])));
    let server = test_server(state);

    let response = server
        .get("/api/chat/resume")
        .add_query_param("streamId", "anything")
        .add_query_param("skipChars", "0")
        .await;
    response.assert_status(StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_resume_replays_buffer_then_tails_live() {
    let (tx, source) = ChannelSource::new();
    let (_store, state) = durable_state(Arc::new(source));
    let base = spawn_server(state).await;
    let client = reqwest::Client::new();

    let stream_id = start_stream(&client, &base).await;

    tx.send(Ok("Hi".to_string())).await.unwrap();
    tx.send(Ok(" there".to_string())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Client held 2 chars ("Hi") when it disconnected
    let response = client
        .get(format!(
            "{}/api/chat/resume?streamId={}&skipChars=2",
            base, stream_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(Ok("!".to_string())).await.unwrap();
        drop(tx);
    });

    let transcript = collect_sse(response).await;
    assert_eq!(transcript.text(), " there!");
    assert!(transcript.done, "Live tail should end with [DONE]");
    assert!(transcript.error.is_none());
}

#[tokio::test]
async fn test_resume_from_zero_replays_everything() {
    let (tx, source) = ChannelSource::new();
    let (_store, state) = durable_state(Arc::new(source));
    let base = spawn_server(state).await;
    let client = reqwest::Client::new();

    let stream_id = start_stream(&client, &base).await;

    tx.send(Ok("Hi".to_string())).await.unwrap();
    tx.send(Ok(" there".to_string())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let response = client
        .get(format!(
            "{}/api/chat/resume?streamId={}&skipChars=0",
            base, stream_id
        ))
        .send()
        .await
        .unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(tx);
    });

    let transcript = collect_sse(response).await;
    assert_eq!(transcript.text(), "Hi there");
    assert!(transcript.done);
}

#[tokio::test]
async fn test_resume_never_delivers_seen_content_twice() {
    // Two identical concurrent resumes must produce identical transcripts,
    // and neither may re-deliver a char the offset already covers
    let (tx, source) = ChannelSource::new();
    let (_store, state) = durable_state(Arc::new(source));
    let base = spawn_server(state).await;
    let client = reqwest::Client::new();

    let stream_id = start_stream(&client, &base).await;

    tx.send(Ok("abcd".to_string())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let url = format!(
        "{}/api/chat/resume?streamId={}&skipChars=2",
        base, stream_id
    );
    let first = client.get(&url).send().await.unwrap();
    let second = client.get(&url).send().await.unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(Ok("ef".to_string())).await.unwrap();
        drop(tx);
    });

    let (first, second) = tokio::join!(collect_sse(first), collect_sse(second));
    assert_eq!(first.text(), "cdef");
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_resume_with_invalid_skip_chars_counts_as_zero() {
    let (tx, source) = ChannelSource::new();
    let (_store, state) = durable_state(Arc::new(source));
    let base = spawn_server(state).await;
    let client = reqwest::Client::new();

    let stream_id = start_stream(&client, &base).await;

    tx.send(Ok("Hi".to_string())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let response = client
        .get(format!(
            "{}/api/chat/resume?streamId={}&skipChars=garbage",
            base, stream_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(tx);
    });

    let transcript = collect_sse(response).await;
    assert_eq!(transcript.text(), "Hi");
    assert!(transcript.done);
}

#[tokio::test]
async fn test_generation_survives_original_disconnect() {
    // The originating connection drops mid-stream; the detached pump keeps
    // recording, and a later resume recovers the full text
    let (tx, source) = ChannelSource::new();
    let (_store, state) = durable_state(Arc::new(source));
    let base = spawn_server(state).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/chat", base))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    let stream_id = response
        .headers()
        .get(STREAM_ID_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    tx.send(Ok("Hi".to_string())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Simulated tab close
    drop(response);
    tokio::time::sleep(Duration::from_millis(50)).await;

    tx.send(Ok(" there".to_string())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let resume = client
        .get(format!(
            "{}/api/chat/resume?streamId={}&skipChars=0",
            base, stream_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resume.status(), reqwest::StatusCode::OK);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(Ok("!".to_string())).await.unwrap();
        drop(tx);
    });

    let transcript = collect_sse(resume).await;
    assert_eq!(transcript.text(), "Hi there!");
    assert!(transcript.done);
}
