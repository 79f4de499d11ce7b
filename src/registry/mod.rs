//! Stream registry
//!
//! Durable, replayable record of one generation's output, decoupled from the
//! lifetime of the HTTP connection that started it. A stream is appended to
//! the backing store chunk by chunk and fanned out over pub/sub; a client
//! that lost its connection resumes by replaying the stored suffix and then
//! tailing the live channel.
//!
//! Durability is best-effort: if the store is unreachable the registry
//! degrades to direct passthrough and the current connection still streams.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::source::TokenStream;
use crate::store::StreamStore;

/// Status of a durable stream record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Generation still in progress
    Pending,
    /// Terminal marker published; nothing further will arrive
    Done,
}

impl StreamStatus {
    fn as_str(self) -> &'static str {
        match self {
            StreamStatus::Pending => "pending",
            StreamStatus::Done => "done",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(StreamStatus::Pending),
            "done" => Some(StreamStatus::Done),
            _ => None,
        }
    }
}

/// One event on a registry output stream, live or resumed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A text delta
    Delta(String),
    /// Clean or failed termination follows an optional `Error`
    Done,
    /// The generation failed; message is user-renderable
    Error(String),
}

/// Boxed stream of registry events
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Store key layout for stream records
pub mod keys {
    /// Status key: "pending" | "done"
    pub fn status(stream_id: &str) -> String {
        format!("restream:stream:{}:status", stream_id)
    }

    /// Number of stored chunks
    pub fn chunk_count(stream_id: &str) -> String {
        format!("restream:stream:{}:chunks", stream_id)
    }

    /// One stored chunk
    pub fn chunk(stream_id: &str, index: i64) -> String {
        format!("restream:stream:{}:chunk:{}", stream_id, index)
    }

    /// Pub/sub channel carrying live chunks
    pub fn channel(stream_id: &str) -> String {
        format!("restream:stream:{}", stream_id)
    }
}

/// Message published on a stream's channel.
///
/// Deltas carry the char offset of their first character so a resuming
/// reader can deduplicate against the replayed prefix by arithmetic rather
/// than timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChannelMessage {
    /// Chars published before this chunk
    #[serde(default)]
    offset: u64,
    /// Chunk text; empty on terminal messages
    #[serde(default)]
    text: String,
    /// Terminal marker
    #[serde(default)]
    done: bool,
    /// Present when the generation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Return the suffix of `s` starting at char index `skip`
fn char_suffix(s: &str, skip: u64) -> &str {
    match s.char_indices().nth(skip as usize) {
        Some((byte_idx, _)) => &s[byte_idx..],
        None => "",
    }
}

/// Server-side stream registry.
///
/// Constructed without a store, every operation degrades to the documented
/// non-durable behavior: passthrough streams with empty ids, and nothing is
/// ever resumable.
pub struct StreamRegistry {
    store: Option<Arc<dyn StreamStore>>,
    ttl_seconds: u64,
}

impl StreamRegistry {
    /// Create a registry backed by `store`, or `None` for passthrough mode
    pub fn new(store: Option<Arc<dyn StreamStore>>, ttl_seconds: u64) -> Self {
        Self { store, ttl_seconds }
    }

    /// Whether a backing store is configured
    pub fn is_durable(&self) -> bool {
        self.store.is_some()
    }

    /// Start a new durable stream from `source`.
    ///
    /// Returns the allocated stream id (empty when durability is
    /// unavailable) and the live event stream for the originating
    /// connection. The forwarding task is detached: it keeps appending to
    /// the store and publishing until the source completes, even after the
    /// returned stream is dropped, so a later resume sees the full
    /// generation.
    pub async fn create_stream(&self, source: TokenStream) -> (String, EventStream) {
        let store = match &self.store {
            Some(store) => Arc::clone(store),
            None => return (String::new(), passthrough(source)),
        };

        let stream_id = Uuid::new_v4().to_string();

        // The record must exist before the response headers go out
        if let Err(e) = store
            .set(
                &keys::status(&stream_id),
                StreamStatus::Pending.as_str(),
                Some(self.ttl_seconds),
            )
            .await
        {
            warn!(error = %e, "Store unavailable at stream creation, serving non-durable");
            return (String::new(), passthrough(source));
        }

        debug!(stream_id = %stream_id, "Registered stream");

        let (tx, rx) = mpsc::channel(64);
        let pump = StreamPump {
            store,
            stream_id: stream_id.clone(),
            ttl_seconds: self.ttl_seconds,
        };
        tokio::spawn(pump.run(source, tx));

        let live = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        (stream_id, Box::pin(live))
    }

    /// Look up a stream's status. `None` means unknown or expired, and the
    /// caller must treat the stream as not resumable.
    #[instrument(skip(self), fields(stream_id = %stream_id))]
    pub async fn has_existing_stream(&self, stream_id: &str) -> Option<StreamStatus> {
        let store = self.store.as_ref()?;
        match store.get(&keys::status(stream_id)).await {
            Ok(Some(value)) => StreamStatus::parse(&value),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Store unavailable at resume lookup");
                None
            }
        }
    }

    /// Resume a stream at `skip_chars`.
    ///
    /// Yields the stored suffix first, then live chunks until the terminal
    /// marker. Returns `None` when the stream is unknown or the store is
    /// unreachable. Safe to call any number of times; each call gets an
    /// identical view of the suffix.
    #[instrument(skip(self), fields(stream_id = %stream_id, skip_chars = skip_chars))]
    pub async fn resume_existing_stream(
        &self,
        stream_id: &str,
        skip_chars: u64,
    ) -> Option<EventStream> {
        let store = Arc::clone(self.store.as_ref()?);

        // Unknown or expired streams are not resumable
        self.has_existing_stream(stream_id).await?;

        // Subscribe before snapshotting the buffer: a chunk published in
        // between lands in the subscription queue and is deduplicated by
        // offset below, so nothing falls in the gap
        let subscription = match store.subscribe(&keys::channel(stream_id)).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!(error = %e, "Store unavailable at resume subscribe");
                return None;
            }
        };

        let buffer = match read_buffer(store.as_ref(), stream_id).await {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!(error = %e, "Store unavailable at resume replay");
                return None;
            }
        };

        // Re-read the status now that the subscription exists. A terminal
        // published before the subscribe never reaches the channel, but the
        // pump writes status `done` before publishing it, so a stream that
        // finished in the window shows up here; waiting on the channel for
        // it would wait forever
        let status = match store.get(&keys::status(stream_id)).await {
            Ok(Some(value)) => StreamStatus::parse(&value).unwrap_or(StreamStatus::Done),
            // Record expired between the two reads; nothing further can
            // arrive, the snapshot is all there is
            Ok(None) => StreamStatus::Done,
            // Transient store failure: keep tailing, the terminal can still
            // arrive on the channel
            Err(e) => {
                warn!(error = %e, "Store unavailable at status re-read");
                StreamStatus::Pending
            }
        };

        let replay = char_suffix(&buffer, skip_chars).to_string();
        // Chars the reader has once the replay is delivered
        let delivered = skip_chars.max(buffer.chars().count() as u64);

        let stream = async_stream::stream! {
            if !replay.is_empty() {
                yield StreamEvent::Delta(replay);
            }

            if status == StreamStatus::Done {
                yield StreamEvent::Done;
                return;
            }

            let mut subscription = subscription;
            let mut delivered = delivered;
            while let Some(raw) = subscription.recv().await {
                let msg: ChannelMessage = match serde_json::from_str(&raw) {
                    Ok(msg) => msg,
                    // Malformed channel payloads are skipped, never fatal
                    Err(_) => continue,
                };

                if msg.done {
                    if let Some(error) = msg.error {
                        yield StreamEvent::Error(error);
                    }
                    yield StreamEvent::Done;
                    return;
                }

                let len = msg.text.chars().count() as u64;
                let end = msg.offset + len;
                if end <= delivered {
                    // Entirely inside the replayed prefix
                    continue;
                }
                let fresh = if msg.offset >= delivered {
                    msg.text
                } else {
                    // Overlaps the boundary: keep only the unseen suffix
                    char_suffix(&msg.text, delivered - msg.offset).to_string()
                };
                delivered = end;
                yield StreamEvent::Delta(fresh);
            }
            // Subscription closed without a terminal marker; end without
            // Done so the client keeps its resume pointer
        };

        Some(Box::pin(stream))
    }
}

/// Concatenate all stored chunks of a stream
async fn read_buffer(
    store: &dyn StreamStore,
    stream_id: &str,
) -> crate::error::AppResult<String> {
    let count: i64 = store
        .get(&keys::chunk_count(stream_id))
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let mut buffer = String::new();
    for index in 0..count {
        match store.get(&keys::chunk(stream_id, index)).await? {
            Some(chunk) => buffer.push_str(&chunk),
            None => {
                // Chunks expire together with the status key; a hole here
                // means the record is mid-expiry
                warn!(stream_id = %stream_id, index, "Missing stored chunk during replay");
            }
        }
    }
    Ok(buffer)
}

/// Wrap a token source as a direct, non-durable event stream
fn passthrough(source: TokenStream) -> EventStream {
    let stream = async_stream::stream! {
        let mut source = source;
        while let Some(item) = source.next().await {
            match item {
                Ok(text) => yield StreamEvent::Delta(text),
                Err(e) => {
                    yield StreamEvent::Error(e.to_string());
                    break;
                }
            }
        }
        yield StreamEvent::Done;
    };
    Box::pin(stream)
}

/// Detached forwarding task for one stream.
///
/// Owns the token source. Appends each delta to the store, publishes it on
/// the stream channel, and forwards it to the live connection. A closed live
/// connection does not stop the pump; a store failure stops persistence but
/// not the live forward.
struct StreamPump {
    store: Arc<dyn StreamStore>,
    stream_id: String,
    ttl_seconds: u64,
}

impl StreamPump {
    async fn run(self, mut source: TokenStream, tx: mpsc::Sender<StreamEvent>) {
        let channel = keys::channel(&self.stream_id);
        let mut offset: u64 = 0;
        let mut chunk_index: i64 = 0;
        let mut durable = true;

        while let Some(item) = source.next().await {
            match item {
                Ok(text) => {
                    if durable {
                        durable = self.persist_chunk(&channel, chunk_index, offset, &text).await;
                    }
                    chunk_index += 1;
                    offset += text.chars().count() as u64;
                    // Ignore a closed receiver: the originating connection is
                    // gone but the generation keeps publishing to the store
                    let _ = tx.send(StreamEvent::Delta(text)).await;
                }
                Err(e) => {
                    let message = e.to_string();
                    if durable {
                        self.publish_terminal(&channel, offset, Some(&message)).await;
                    }
                    let _ = tx.send(StreamEvent::Error(message)).await;
                    let _ = tx.send(StreamEvent::Done).await;
                    return;
                }
            }
        }

        if durable {
            self.publish_terminal(&channel, offset, None).await;
        }
        let _ = tx.send(StreamEvent::Done).await;
    }

    /// Store one chunk and fan it out. Returns false when the store failed
    /// and persistence must be abandoned for this stream.
    async fn persist_chunk(&self, channel: &str, index: i64, offset: u64, text: &str) -> bool {
        let result = async {
            self.store
                .set(
                    &keys::chunk(&self.stream_id, index),
                    text,
                    Some(self.ttl_seconds),
                )
                .await?;
            // Count goes last: counted chunks are always readable
            self.store
                .incr(&keys::chunk_count(&self.stream_id), 1)
                .await?;
            // INCR on a fresh key sets no expiry; re-arm the count's TTL on
            // every write so it outlives the newest chunk, never the record
            self.store
                .expire(&keys::chunk_count(&self.stream_id), self.ttl_seconds)
                .await?;
            let msg = ChannelMessage {
                offset,
                text: text.to_string(),
                done: false,
                error: None,
            };
            self.store
                .publish(channel, &serde_json::to_string(&msg).unwrap_or_default())
                .await
        }
        .await;

        if let Err(e) = result {
            warn!(stream_id = %self.stream_id, error = %e, "Store failure mid-stream, abandoning durability");
            // Best effort: unblock anyone already tailing the channel
            self.publish_terminal(channel, offset, Some("stream durability lost")).await;
            return false;
        }
        true
    }

    async fn publish_terminal(&self, channel: &str, offset: u64, error: Option<&str>) {
        // Status first, then the channel message. A resume re-reads the
        // status after subscribing, so a terminal it cannot receive on the
        // channel is always visible in the status
        if let Err(e) = self
            .store
            .set(
                &keys::status(&self.stream_id),
                StreamStatus::Done.as_str(),
                Some(self.ttl_seconds),
            )
            .await
        {
            warn!(stream_id = %self.stream_id, error = %e, "Failed to mark stream done");
        }
        let msg = ChannelMessage {
            offset,
            text: String::new(),
            done: true,
            error: error.map(|e| e.to_string()),
        };
        if let Err(e) = self
            .store
            .publish(channel, &serde_json::to_string(&msg).unwrap_or_default())
            .await
        {
            warn!(stream_id = %self.stream_id, error = %e, "Failed to publish terminal marker");
        }
    }
}
