//! SSE (Server-Sent Events) transport codec
//!
//! Defines the wire format shared by the start and resume endpoints: how text
//! deltas are framed as SSE events, the `[DONE]` terminal sentinel, and the
//! line buffering needed to decode events whose bytes are split across
//! network reads.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Payload of the terminal SSE event. Always the last event on the wire.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One incremental fragment of generated text, as carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
pub struct StreamDelta {
    /// The text fragment
    pub text: String,
}

/// A decoded SSE event from either endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// A text delta to append to the assistant message
    Delta(String),
    /// Clean terminal sentinel; no further events follow
    Done,
    /// Terminal failure; the message carries a user-renderable description
    Error(String),
}

/// Error payload sent as a terminal event when generation fails mid-stream.
#[derive(Debug, Serialize, Deserialize)]
struct WireError {
    error: WireErrorBody,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

/// Format a text delta as an SSE data event: `data: {json}\n\n`.
pub fn format_data_event(delta: &StreamDelta) -> Bytes {
    let json = serde_json::to_string(delta).expect("StreamDelta should always serialize");
    Bytes::from(format!("data: {}\n\n", json))
}

/// Format the terminal sentinel: `data: [DONE]\n\n`.
pub fn format_done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

/// Format a terminal error event.
///
/// Emitted before `[DONE]` when the token source fails mid-generation, so the
/// client can render a failure message into the assistant slot instead of
/// leaving it blank.
pub fn format_error_event(message: &str) -> Bytes {
    let event = WireError {
        error: WireErrorBody {
            message: message.to_string(),
            error_type: "stream_error".to_string(),
        },
    };
    let json = serde_json::to_string(&event).expect("WireError should always serialize");
    Bytes::from(format!("data: {}\n\n", json))
}

/// Parse one complete SSE line into a wire event.
///
/// Returns `None` for anything that is not a well-formed `data:` line —
/// comments, unknown fields, malformed JSON. A single bad line never aborts
/// the stream; the caller simply skips it.
pub fn parse_data_line(line: &str) -> Option<WireEvent> {
    let payload = line.strip_prefix("data:")?.trim();

    if payload == DONE_SENTINEL {
        return Some(WireEvent::Done);
    }

    let value: serde_json::Value = serde_json::from_str(payload).ok()?;

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("stream error")
            .to_string();
        return Some(WireEvent::Error(message));
    }

    let delta: StreamDelta = serde_json::from_value(value).ok()?;
    Some(WireEvent::Delta(delta.text))
}

/// Buffer for accumulating incomplete SSE lines across chunk boundaries.
///
/// SSE data arrives as byte chunks that may not align with line boundaries.
/// This buffer accumulates incomplete lines until a complete line (ending
/// with \n) is available for processing.
///
/// # Example
/// ```
/// use restream::sse::SseLineBuffer;
///
/// let mut buffer = SseLineBuffer::new();
///
/// // First chunk contains partial line
/// let lines1 = buffer.feed(b"data: {\"text\":\"hel");
/// assert!(lines1.is_empty()); // No complete lines yet
///
/// // Second chunk completes the line
/// let lines2 = buffer.feed(b"lo\"}\n");
/// assert_eq!(lines2, vec!["data: {\"text\":\"hello\"}"]);
/// ```
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    /// Accumulated incomplete line data
    incomplete: String,
}

impl SseLineBuffer {
    /// Create a new empty buffer
    pub fn new() -> Self {
        Self {
            incomplete: String::new(),
        }
    }

    /// Feed bytes into the buffer and return any complete lines.
    ///
    /// Complete lines are those ending with `\n`. The newline (and a trailing
    /// `\r`, for proxies that emit CRLF) is stripped from returned lines.
    /// Incomplete trailing data is retained in the buffer for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        // Invalid UTF-8 is replaced rather than erroring; one mangled byte
        // must not abort the whole stream
        let text = String::from_utf8_lossy(bytes);

        self.incomplete.push_str(&text);

        let mut complete_lines = Vec::new();

        while let Some(newline_pos) = self.incomplete.find('\n') {
            let mut line = self.incomplete[..newline_pos].to_string();
            self.incomplete = self.incomplete[newline_pos + 1..].to_string();

            if line.ends_with('\r') {
                line.pop();
            }

            // Skip empty lines (SSE uses double newlines as separators)
            if !line.is_empty() {
                complete_lines.push(line);
            }
        }

        complete_lines
    }

    /// Check if there's any incomplete data remaining in the buffer.
    ///
    /// Useful for detecting truncated streams at end of response.
    pub fn has_incomplete(&self) -> bool {
        !self.incomplete.is_empty()
    }

    /// Get any remaining incomplete data.
    pub fn remaining(&self) -> &str {
        &self.incomplete
    }
}
