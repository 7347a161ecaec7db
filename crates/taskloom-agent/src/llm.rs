//! LLM adapter interface
//!
//! Adapters translate the core message model into a provider's wire format
//! and back. Required conventions:
//! - wrap each message's text payload in `<block>…</block>` so the model can
//!   tell consecutive same-role messages apart
//! - honor `format_json`, the tool list minus `exclude_tools`, and
//!   `tool_choice`
//! - report `StopReason::ToolCall` whenever the response carries tool calls
//! - leave `CompletionUsage` at its sentinel when the provider reports none

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use taskloom_core::completion::CompletionConfig;
use taskloom_core::message::{ContentBlock, Message, Role};
use taskloom_core::queue::Queue;

pub const BLOCK_OPEN: &str = "<block>";
pub const BLOCK_CLOSE: &str = "</block>";

/// Wrap one text payload in the block delimiter.
pub fn wrap_block(text: &str) -> String {
    format!("{BLOCK_OPEN}{text}{BLOCK_CLOSE}")
}

/// Render messages into a delimiter-wrapped transcript. Adapters for
/// plain-text providers can feed this directly; structured providers apply
/// [`wrap_block`] per message instead.
pub fn render_block_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        if !out.is_empty() {
            out.push('\n');
        }
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        out.push_str(role);
        out.push_str(": ");
        out.push_str(&wrap_block(&message.text()));
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("malformed response: {0}")]
    Response(String),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

/// Provider-facing completion interface.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one completion. When `stream` is given the adapter pushes interim
    /// assistant deltas to it before returning the final message.
    async fn completion(
        &self,
        messages: &[Message],
        config: &CompletionConfig,
        stream: Option<&Queue<Message>>,
    ) -> Result<Message, LlmError>;

    /// Embedding entry point for memory hooks; unused by the core itself.
    async fn embed(&self, _text: &str, _dimensions: usize) -> Result<Vec<f32>, LlmError> {
        Err(LlmError::Unsupported("embed"))
    }

    async fn embed_batch(
        &self,
        _texts: &[String],
        _dimensions: usize,
    ) -> Result<Vec<Vec<f32>>, LlmError> {
        Err(LlmError::Unsupported("embed_batch"))
    }
}

/// Scripted in-memory LLM for tests: replies are handed back in the order
/// they were queued, with whitespace-token streaming when requested.
#[derive(Default)]
pub struct MockLlm {
    replies: Mutex<VecDeque<Message>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: Message) {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(reply);
    }

    pub fn with_replies(replies: impl IntoIterator<Item = Message>) -> Self {
        let mock = Self::new();
        for reply in replies {
            mock.push_reply(reply);
        }
        mock
    }

    pub fn remaining(&self) -> usize {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn completion(
        &self,
        _messages: &[Message],
        _config: &CompletionConfig,
        stream: Option<&Queue<Message>>,
    ) -> Result<Message, LlmError> {
        let reply = self
            .replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .ok_or_else(|| LlmError::Response("mock reply script exhausted".to_string()))?;

        if let Some(stream) = stream {
            for token in reply.text().split_inclusive(char::is_whitespace) {
                if token.is_empty() {
                    continue;
                }
                let delta = Message::new(Role::Assistant, vec![ContentBlock::text(token)]);
                if stream.put(delta).await.is_err() {
                    break;
                }
            }
        }
        Ok(reply)
    }
}
