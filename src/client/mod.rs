//! Client reconnection state machine
//!
//! The browser-side half of the resume protocol, expressed as an embeddable
//! client: it persists stream identity and progress as bytes arrive, detects
//! an unfinished stream on startup, and drives the resume request, splicing
//! replayed content into the existing message list.
//!
//! The load-bearing rules, in order:
//! - the persisted char offset advances *before* a delta reaches the message
//!   list, so a resume never re-requests displayed content as new;
//! - persisted state is cleared only on a clean terminal signal;
//! - a transport error never clears persisted state — that is the
//!   resumability contract.

pub mod message;
pub mod persistence;

use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::routes::chat::{CONVERSATION_ID_HEADER, STREAM_ID_HEADER};
use crate::sse::{parse_data_line, SseLineBuffer, WireEvent};

pub use self::message::{Message, MessagePart, Role};
pub use self::persistence::{MemoryPointerStore, PointerStore, StreamPointer};

/// Client-side errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {0}")]
    Server(reqwest::StatusCode),

    #[error("Stream ended without a terminal signal")]
    UnexpectedEof,

    #[error("Persistence error: {0}")]
    Persistence(#[from] anyhow::Error),
}

/// Observable state of the chat client.
///
/// `Resuming` is distinct from `Streaming`: the user did not just submit a
/// message, so the UI shows a recovery indicator instead of a fresh
/// generation one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatStatus {
    /// Nothing in flight
    Idle,
    /// Request sent, no delta received yet
    Submitted,
    /// Deltas arriving
    Streaming,
    /// Reattaching to an interrupted stream
    Resuming,
}

/// Reconnecting chat client.
///
/// Cancellation is dropping the in-flight future: `send` and
/// `resume_if_needed` persist incrementally, so an aborted call leaves the
/// pointer exactly as far as the last processed chunk.
pub struct ChatClient<P: PointerStore> {
    http: reqwest::Client,
    base_url: String,
    store: P,
    messages: Vec<Message>,
    status: ChatStatus,
    conversation_id: Option<String>,
    pointer: Option<StreamPointer>,
}

impl<P: PointerStore> ChatClient<P> {
    /// Create a client against `base_url`, restoring any persisted snapshot.
    ///
    /// Call [`resume_if_needed`](Self::resume_if_needed) afterwards to
    /// reattach to an interrupted stream.
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, store: P) -> Result<Self, ClientError> {
        let messages = store.load_messages()?;
        let pointer = store.load_pointer()?;
        let conversation_id = pointer.as_ref().map(|p| p.conversation_id.clone());
        Ok(Self {
            http,
            base_url: base_url.into(),
            store,
            messages,
            status: ChatStatus::Idle,
            conversation_id,
            pointer,
        })
    }

    /// Current message list
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Current state machine status
    pub fn status(&self) -> ChatStatus {
        self.status
    }

    /// Conversation id, once known
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Whether an interrupted stream is waiting to be resumed
    pub fn has_pending_stream(&self) -> bool {
        self.pointer.is_some()
    }

    /// Send a user message and stream the assistant reply.
    ///
    /// On a transport error the persisted pointer is kept so the next load
    /// can resume; only a clean terminal clears it.
    pub async fn send(&mut self, text: &str) -> Result<(), ClientError> {
        self.messages.push(Message::user(text));
        self.messages.push(Message::assistant_placeholder());
        self.store.save_messages(&self.messages)?;
        self.status = ChatStatus::Submitted;

        let body = serde_json::json!({
            "messages": self.messages[..self.messages.len() - 1]
                .iter()
                .map(Message::to_wire)
                .collect::<Vec<_>>(),
            "conversationId": self.conversation_id,
        });

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                self.status = ChatStatus::Idle;
                e
            })?;

        if !response.status().is_success() {
            self.status = ChatStatus::Idle;
            return Err(ClientError::Server(response.status()));
        }

        let stream_id = header_value(&response, STREAM_ID_HEADER);
        let conversation_id = header_value(&response, CONVERSATION_ID_HEADER);
        if !conversation_id.is_empty() {
            self.conversation_id = Some(conversation_id.clone());
        }

        // Persist the pointer before reading any body bytes; an empty stream
        // id means durability is off and there is nothing to resume
        if stream_id.is_empty() {
            self.pointer = None;
        } else {
            let pointer = StreamPointer {
                stream_id,
                conversation_id,
                char_offset: 0,
            };
            self.store.save_pointer(&pointer)?;
            self.pointer = Some(pointer);
        }

        self.consume_stream(response).await
    }

    /// Resume an interrupted stream, if the persisted pointer names one.
    ///
    /// Returns `true` when a resume was attempted. A `204` from the server
    /// means nothing can be recovered: the pointer is cleared and the
    /// partial message stands as final.
    pub async fn resume_if_needed(&mut self) -> Result<bool, ClientError> {
        let pointer = match &self.pointer {
            Some(pointer) => pointer.clone(),
            None => return Ok(false),
        };

        // The replay splices into the existing last assistant message; make
        // sure there is one to splice into
        if !matches!(
            self.messages.last(),
            Some(message) if message.role == Role::Assistant
        ) {
            self.messages.push(Message::assistant_placeholder());
        }

        self.status = ChatStatus::Resuming;
        info!(stream_id = %pointer.stream_id, char_offset = pointer.char_offset, "Resuming stream");

        let response = self
            .http
            .get(format!(
                "{}/api/chat/resume?streamId={}&skipChars={}",
                self.base_url, pointer.stream_id, pointer.char_offset
            ))
            .send()
            .await
            .map_err(|e| {
                // Pointer intentionally kept: the next load retries
                self.status = ChatStatus::Idle;
                e
            })?;

        if response.status() == reqwest::StatusCode::NO_CONTENT {
            debug!(stream_id = %pointer.stream_id, "Nothing to resume");
            self.clear_stream_state()?;
            return Ok(true);
        }

        if !response.status().is_success() {
            self.status = ChatStatus::Idle;
            return Err(ClientError::Server(response.status()));
        }

        self.consume_stream(response).await?;
        Ok(true)
    }

    /// Clear the conversation and any persisted stream state
    pub fn reset(&mut self) -> Result<(), ClientError> {
        self.messages.clear();
        self.store.save_messages(&self.messages)?;
        self.clear_stream_state()?;
        self.conversation_id = None;
        Ok(())
    }

    /// Consume an SSE body, splicing deltas into the last assistant message
    async fn consume_stream(&mut self, response: reqwest::Response) -> Result<(), ClientError> {
        let mut bytes = response.bytes_stream();
        let mut buffer = SseLineBuffer::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    // Abnormal termination: pointer survives for resume
                    warn!(error = %e, "Stream transport error");
                    self.status = ChatStatus::Idle;
                    return Err(ClientError::Http(e));
                }
            };

            for line in buffer.feed(&chunk) {
                match parse_data_line(&line) {
                    Some(WireEvent::Delta(text)) => {
                        self.status = ChatStatus::Streaming;
                        // Offset first: delivered-to-UI content must never
                        // be ahead of the persisted offset
                        self.advance_pointer(text.chars().count() as u64)?;
                        self.append_to_assistant(&text);
                        self.store.save_messages(&self.messages)?;
                    }
                    Some(WireEvent::Done) => {
                        self.clear_stream_state()?;
                        return Ok(());
                    }
                    Some(WireEvent::Error(message)) => {
                        // Terminal failure: show it in the assistant slot
                        // rather than leaving the message blank forever
                        self.append_to_assistant(&message);
                        self.store.save_messages(&self.messages)?;
                        self.clear_stream_state()?;
                        return Ok(());
                    }
                    // Malformed line: skip, never abort
                    None => continue,
                }
            }
        }

        // EOF without [DONE] is not a clean terminal; keep the pointer
        self.status = ChatStatus::Idle;
        Err(ClientError::UnexpectedEof)
    }

    fn advance_pointer(&mut self, chars: u64) -> Result<(), ClientError> {
        if let Some(pointer) = &mut self.pointer {
            pointer.char_offset += chars;
            self.store.save_pointer(pointer)?;
        }
        Ok(())
    }

    fn append_to_assistant(&mut self, text: &str) {
        match self.messages.last_mut() {
            Some(message) if message.role == Role::Assistant => message.append_text(text),
            _ => {
                let mut message = Message::assistant_placeholder();
                message.append_text(text);
                self.messages.push(message);
            }
        }
    }

    fn clear_stream_state(&mut self) -> Result<(), ClientError> {
        self.store.clear_pointer()?;
        self.pointer = None;
        self.status = ChatStatus::Idle;
        Ok(())
    }
}

fn header_value(response: &reqwest::Response, name: &str) -> String {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
