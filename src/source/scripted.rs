//! Test token sources
//!
//! `ScriptedSource` replays a fixed list of deltas; `ChannelSource` lets a
//! test feed deltas interactively to exercise mid-stream timing.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{AppError, AppResult};

use super::{ChatMessage, SourceError, TokenSource, TokenStream};

/// One step in a scripted generation
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Emit a text delta
    Delta(String),
    /// Fail the generation with this message
    Fail(String),
}

/// Token source replaying a fixed script, ignoring the message history
pub struct ScriptedSource {
    steps: Vec<ScriptStep>,
    /// Pause between deltas, to let a consumer interleave
    delay: Option<Duration>,
}

impl ScriptedSource {
    /// Script that emits the given deltas and completes cleanly
    pub fn new<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: deltas
                .into_iter()
                .map(|d| ScriptStep::Delta(d.into()))
                .collect(),
            delay: None,
        }
    }

    /// Script with explicit steps (deltas and/or a failure)
    pub fn with_steps(steps: Vec<ScriptStep>) -> Self {
        Self { steps, delay: None }
    }

    /// Sleep between deltas
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl TokenSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn stream_completion(&self, _messages: Vec<ChatMessage>) -> AppResult<TokenStream> {
        let steps = self.steps.clone();
        let delay = self.delay;
        let stream = async_stream::stream! {
            for step in steps {
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                match step {
                    ScriptStep::Delta(text) => yield Ok(text),
                    ScriptStep::Fail(msg) => {
                        yield Err(SourceError::Upstream(msg));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Token source driven by a test through an mpsc channel.
///
/// Single-use: the first `stream_completion` call takes the receiver.
/// Close the sender to complete the generation cleanly.
pub struct ChannelSource {
    rx: Mutex<Option<mpsc::Receiver<Result<String, SourceError>>>>,
}

impl ChannelSource {
    /// Create a channel source; the returned sender feeds the stream
    pub fn new() -> (mpsc::Sender<Result<String, SourceError>>, Self) {
        let (tx, rx) = mpsc::channel(64);
        (
            tx,
            Self {
                rx: Mutex::new(Some(rx)),
            },
        )
    }
}

#[async_trait]
impl TokenSource for ChannelSource {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn stream_completion(&self, _messages: Vec<ChatMessage>) -> AppResult<TokenStream> {
        let mut rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| AppError::ServiceUnavailable("channel source already used".into()))?;
        let stream = async_stream::stream! {
            while let Some(item) = rx.recv().await {
                let failed = item.is_err();
                yield item;
                if failed {
                    break;
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
