//! Token source abstraction
//!
//! A token source produces the ordered sequence of text fragments for one
//! generation request. The registry and routes consume it through the
//! `TokenSource` trait so the upstream LLM stays an opaque collaborator;
//! the production implementation speaks the OpenAI streaming API.

pub mod openai;

#[cfg(any(test, feature = "test-utils"))]
pub mod scripted;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AppResult;

pub use self::openai::OpenAiSource;

#[cfg(any(test, feature = "test-utils"))]
pub use self::scripted::{ChannelSource, ScriptStep, ScriptedSource};

/// A chat message as submitted by the client and forwarded upstream
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ChatMessage {
    /// Message author: "system", "user" or "assistant"
    pub role: String,
    /// Message text
    pub content: String,
}

/// Failure of a generation after streaming has started.
///
/// Distinct from completion: the stream ends cleanly on exhaustion and
/// terminally on the first `Err` item.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Upstream stream error: {0}")]
    Upstream(String),

    #[error("Upstream connection lost: {0}")]
    ConnectionLost(String),
}

/// Ordered, unbounded sequence of text deltas for one generation.
///
/// Cancellation is dropping the stream.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, SourceError>> + Send>>;

/// Trait for pluggable generation backends.
///
/// Errors before any delta is produced surface as `AppError` (the request
/// can still fail with a normal HTTP status); errors mid-stream travel as
/// `SourceError` items inside the returned stream.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Source name for logging and metrics
    fn name(&self) -> &'static str;

    /// Start a generation for the given message history
    async fn stream_completion(&self, messages: Vec<ChatMessage>) -> AppResult<TokenStream>;
}
