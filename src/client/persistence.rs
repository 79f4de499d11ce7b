//! Client-side persisted state
//!
//! The browser original keeps its resume state in session storage under two
//! fixed keys. The `PointerStore` trait models that surface so the state
//! machine stays independent of where the bytes land.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::message::Message;

/// Storage key for the active stream pointer
pub const ACTIVE_STREAM_KEY: &str = "restream:active-stream";

/// Storage key for the message list snapshot
pub const MESSAGES_KEY: &str = "restream:messages";

/// The client's best-known progress into a specific stream.
///
/// Created when a stream starts, advanced on every chunk, cleared only on a
/// clean terminal signal. Surviving an abnormal termination is the point:
/// the pointer left behind is what drives the resume on next load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPointer {
    pub stream_id: String,
    pub conversation_id: String,
    pub char_offset: u64,
}

/// Session-storage-shaped persistence for the client state machine
pub trait PointerStore: Send + Sync {
    /// Persist the active stream pointer
    fn save_pointer(&self, pointer: &StreamPointer) -> Result<()>;

    /// Load the active stream pointer, if any
    fn load_pointer(&self) -> Result<Option<StreamPointer>>;

    /// Remove the active stream pointer
    fn clear_pointer(&self) -> Result<()>;

    /// Snapshot the message list (convenience cache, not source of truth)
    fn save_messages(&self, messages: &[Message]) -> Result<()>;

    /// Load the message list snapshot
    fn load_messages(&self) -> Result<Vec<Message>>;
}

/// In-memory `PointerStore`, keyed exactly like the session storage original
#[derive(Debug, Default)]
pub struct MemoryPointerStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryPointerStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl PointerStore for MemoryPointerStore {
    fn save_pointer(&self, pointer: &StreamPointer) -> Result<()> {
        let json = serde_json::to_string(pointer)?;
        self.entries
            .write()
            .unwrap()
            .insert(ACTIVE_STREAM_KEY.to_string(), json);
        Ok(())
    }

    fn load_pointer(&self) -> Result<Option<StreamPointer>> {
        let entries = self.entries.read().unwrap();
        match entries.get(ACTIVE_STREAM_KEY) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    fn clear_pointer(&self) -> Result<()> {
        self.entries.write().unwrap().remove(ACTIVE_STREAM_KEY);
        Ok(())
    }

    fn save_messages(&self, messages: &[Message]) -> Result<()> {
        let json = serde_json::to_string(messages)?;
        self.entries
            .write()
            .unwrap()
            .insert(MESSAGES_KEY.to_string(), json);
        Ok(())
    }

    fn load_messages(&self) -> Result<Vec<Message>> {
        let entries = self.entries.read().unwrap();
        match entries.get(MESSAGES_KEY) {
            Some(json) => Ok(serde_json::from_str(json)?),
            None => Ok(Vec::new()),
        }
    }
}
