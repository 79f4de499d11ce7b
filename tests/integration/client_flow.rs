//! Client state machine end-to-end tests
//!
//! The full round trip: a `ChatClient` talking to a real server over HTTP,
//! persisting its pointer as chunks arrive, and recovering interrupted
//! streams through the resume endpoint.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;

use restream::client::{
    ChatClient, ChatStatus, MemoryPointerStore, Message, PointerStore, Role, StreamPointer,
};
use restream::routes::chat::{CONVERSATION_ID_HEADER, STREAM_ID_HEADER};
use restream::source::{ChannelSource, ScriptStep, ScriptedSource};

use crate::common::{durable_state, passthrough_state, spawn_server};

/// Pointer store that records every offset the client persists
struct RecordingStore {
    inner: MemoryPointerStore,
    offsets: Arc<Mutex<Vec<u64>>>,
}

impl RecordingStore {
    fn new() -> (Arc<Mutex<Vec<u64>>>, Self) {
        let offsets = Arc::new(Mutex::new(Vec::new()));
        (
            offsets.clone(),
            Self {
                inner: MemoryPointerStore::new(),
                offsets,
            },
        )
    }
}

impl PointerStore for RecordingStore {
    fn save_pointer(&self, pointer: &StreamPointer) -> Result<()> {
        self.offsets.lock().unwrap().push(pointer.char_offset);
        self.inner.save_pointer(pointer)
    }

    fn load_pointer(&self) -> Result<Option<StreamPointer>> {
        self.inner.load_pointer()
    }

    fn clear_pointer(&self) -> Result<()> {
        self.inner.clear_pointer()
    }

    fn save_messages(&self, messages: &[Message]) -> Result<()> {
        self.inner.save_messages(messages)
    }

    fn load_messages(&self) -> Result<Vec<Message>> {
        self.inner.load_messages()
    }
}

#[tokio::test]
async fn test_send_streams_full_reply_and_clears_pointer() {
    let source = Arc::new(ScriptedSource::new(["Hi", " there", "!"]));
    let (_store, state) = durable_state(source);
    let base = spawn_server(state).await;

    let (offsets, store) = RecordingStore::new();
    let mut client = ChatClient::new(reqwest::Client::new(), base, store).unwrap();

    client.send("hello").await.unwrap();

    let messages = client.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].text(), "hello");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].text(), "Hi there!");

    assert_eq!(client.status(), ChatStatus::Idle);
    assert!(!client.has_pending_stream(), "Clean terminal clears the pointer");
    assert!(client.conversation_id().is_some());

    // Offset persisted ahead of each append: 0 at start, then the running
    // char totals 2 ("Hi"), 8 (" there"), 9 ("!")
    let offsets = offsets.lock().unwrap();
    assert_eq!(*offsets, vec![0, 2, 8, 9]);
}

#[tokio::test]
async fn test_interrupted_stream_resumes_into_same_message() {
    let (tx, source) = ChannelSource::new();
    let (_store, state) = durable_state(Arc::new(source));
    let base = spawn_server(state).await;
    let http = reqwest::Client::new();

    // A first client starts a stream, receives "Hi", then its tab dies
    let response = http
        .post(format!("{}/api/chat", base))
        .json(&json!({ "messages": [{ "role": "user", "content": "hello" }] }))
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
    let conversation_id = response
        .headers()
        .get(CONVERSATION_ID_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    tx.send(Ok("Hi".to_string())).await.unwrap();
    let mut body = response.bytes_stream();
    let _ = body.next().await;
    drop(body);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The state that tab would have left behind in session storage
    let store = MemoryPointerStore::new();
    let mut partial = Message::assistant_placeholder();
    partial.append_text("Hi");
    store
        .save_messages(&[Message::user("hello"), partial])
        .unwrap();
    store
        .save_pointer(&StreamPointer {
            stream_id,
            conversation_id: conversation_id.clone(),
            char_offset: 2,
        })
        .unwrap();

    // A fresh client loads that state and resumes while the generation is
    // still producing
    let mut client = ChatClient::new(http, base, store).unwrap();
    assert!(client.has_pending_stream());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(Ok(" there".to_string())).await.unwrap();
        tx.send(Ok("!".to_string())).await.unwrap();
        drop(tx);
    });

    let resumed = client.resume_if_needed().await.unwrap();
    assert!(resumed);

    let messages = client.messages();
    assert_eq!(messages.len(), 2, "Replay splices, never appends a message");
    assert_eq!(messages[1].text(), "Hi there!");
    assert_eq!(client.status(), ChatStatus::Idle);
    assert!(!client.has_pending_stream());
    assert_eq!(client.conversation_id(), Some(conversation_id.as_str()));
}

#[tokio::test]
async fn test_stale_pointer_clears_on_204() {
    let source = Arc::new(ScriptedSource::new(["never"]));
    let (_store, state) = durable_state(source);
    let base = spawn_server(state).await;

    let store = MemoryPointerStore::new();
    let mut partial = Message::assistant_placeholder();
    partial.append_text("partial answer");
    store
        .save_messages(&[Message::user("hello"), partial])
        .unwrap();
    store
        .save_pointer(&StreamPointer {
            stream_id: "expired-stream".to_string(),
            conversation_id: "c1".to_string(),
            char_offset: 14,
        })
        .unwrap();

    let mut client = ChatClient::new(reqwest::Client::new(), base, store).unwrap();
    let resumed = client.resume_if_needed().await.unwrap();

    // The attempt happened, there was nothing to recover, and the partial
    // message stands as final
    assert!(resumed);
    assert!(!client.has_pending_stream());
    assert_eq!(client.status(), ChatStatus::Idle);
    assert_eq!(client.messages()[1].text(), "partial answer");
}

#[tokio::test]
async fn test_resume_if_needed_is_noop_without_pointer() {
    let source = Arc::new(ScriptedSource::new(["ok"]));
    let (_store, state) = durable_state(source);
    let base = spawn_server(state).await;

    let mut client =
        ChatClient::new(reqwest::Client::new(), base, MemoryPointerStore::new()).unwrap();
    assert!(!client.resume_if_needed().await.unwrap());
}

#[tokio::test]
async fn test_send_in_passthrough_mode_never_persists_pointer() {
    let source = Arc::new(ScriptedSource::new(["Hi", "!"]));
    let state = passthrough_state(source);
    let base = spawn_server(state).await;

    let (offsets, store) = RecordingStore::new();
    let mut client = ChatClient::new(reqwest::Client::new(), base, store).unwrap();

    client.send("hello").await.unwrap();

    assert_eq!(client.messages()[1].text(), "Hi!");
    assert!(!client.has_pending_stream());
    assert!(
        offsets.lock().unwrap().is_empty(),
        "No durable stream, nothing to point at"
    );
}

#[tokio::test]
async fn test_terminal_error_renders_and_clears_pointer() {
    let source = Arc::new(ScriptedSource::with_steps(vec![
        ScriptStep::Delta("part".to_string()),
        ScriptStep::Fail("model unavailable".to_string()),
    ]));
    let (_store, state) = durable_state(source);
    let base = spawn_server(state).await;

    let mut client =
        ChatClient::new(reqwest::Client::new(), base, MemoryPointerStore::new()).unwrap();
    client.send("hello").await.unwrap();

    let text = client.messages()[1].text();
    assert!(text.starts_with("part"));
    assert!(text.contains("model unavailable"));
    assert!(
        !client.has_pending_stream(),
        "An error terminal is still a terminal"
    );
}

#[tokio::test]
async fn test_reset_clears_messages_and_pointer() {
    let source = Arc::new(ScriptedSource::new(["Hi"]));
    let (_store, state) = durable_state(source);
    let base = spawn_server(state).await;

    let store = MemoryPointerStore::new();
    store
        .save_pointer(&StreamPointer {
            stream_id: "s1".to_string(),
            conversation_id: "c1".to_string(),
            char_offset: 5,
        })
        .unwrap();
    store.save_messages(&[Message::user("old")]).unwrap();

    let mut client = ChatClient::new(reqwest::Client::new(), base, store).unwrap();
    assert!(client.has_pending_stream());

    client.reset().unwrap();
    assert!(client.messages().is_empty());
    assert!(!client.has_pending_stream());
    assert_eq!(client.conversation_id(), None);
}
