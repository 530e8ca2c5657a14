//! Chat types and the completion stream seam
//!
//! The agent only ever talks to `CompletionStream`; the production
//! implementation is the OpenAI-compatible SSE client in `client`, and
//! tests substitute scripted streams.

pub mod client;

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::metrics::UsageRecord;

pub use client::LlmClient;

/// Role of the message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Incremental events from a streaming completion.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Reasoning-trace chunk, shown but never fed back into history.
    Reasoning(String),
    /// Answer content chunk.
    Content(String),
    /// Usage report, typically arriving once near the end of the stream.
    Usage(UsageRecord),
    /// Stream finished normally.
    Done,
}

pub type EventStream<'a> = Pin<Box<dyn Stream<Item = CoreResult<StreamEvent>> + Send + 'a>>;

/// Anything that can stream a chat completion for a message history.
pub trait CompletionStream: Send + Sync {
    fn chat_stream<'a>(&'a self, messages: &'a [ChatMessage]) -> EventStream<'a>;
}
