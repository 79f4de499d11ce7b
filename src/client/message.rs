//! Conversation message types
//!
//! The client keeps an ordered list of role-tagged messages, each made of
//! typed parts. Streamed deltas extend the text part of the last assistant
//! message in place.

use serde::{Deserialize, Serialize};

use crate::source::ChatMessage;

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One typed part of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessagePart {
    Text { text: String },
}

/// A role-tagged message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<MessagePart>,
}

impl Message {
    /// A user message with a single text part
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![MessagePart::Text { text: text.into() }],
        }
    }

    /// An empty assistant message, the splice target for streamed deltas
    pub fn assistant_placeholder() -> Self {
        Self {
            role: Role::Assistant,
            parts: vec![MessagePart::Text {
                text: String::new(),
            }],
        }
    }

    /// Concatenated text content of all text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                MessagePart::Text { text } => text.as_str(),
            })
            .collect()
    }

    /// Extend the last text part in place (streaming append)
    pub fn append_text(&mut self, delta: &str) {
        match self.parts.last_mut() {
            Some(MessagePart::Text { text }) => text.push_str(delta),
            None => self.parts.push(MessagePart::Text {
                text: delta.to_string(),
            }),
        }
    }

    /// Flatten into the wire format sent to the start endpoint
    pub fn to_wire(&self) -> ChatMessage {
        ChatMessage {
            role: self.role.as_str().to_string(),
            content: self.text(),
        }
    }
}
