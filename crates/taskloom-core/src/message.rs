//! Message data model
//!
//! A `Message` is the unit of conversation context exchanged between tasks,
//! agents, LLM adapters and the out queue. Transient failures (tool errors,
//! human interference) are carried as `is_error` messages, never as Rust
//! errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base64: Option<String>,
    },
    Video {
        url: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

/// A tool invocation requested by the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default = "default_call_type")]
    pub call_type: String,
}

fn default_call_type() -> String {
    "function".to_string()
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
            call_type: default_call_type(),
        }
    }
}

/// Why the LLM stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    Length,
    ToolCall,
    ContentFilter,
    #[default]
    None,
}

/// Token accounting for one completion. `-1` means the provider did not
/// report usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

impl Default for CompletionUsage {
    fn default() -> Self {
        Self {
            prompt_tokens: -1,
            completion_tokens: -1,
            total_tokens: -1,
        }
    }
}

impl CompletionUsage {
    pub fn new(prompt_tokens: i64, completion_tokens: i64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn is_known(&self) -> bool {
        self.total_tokens >= 0
    }
}

/// One unit of conversation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub stop_reason: StopReason,
    #[serde(default)]
    pub usage: CompletionUsage,
    #[serde(default)]
    pub is_error: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            stop_reason: StopReason::None,
            usage: CompletionUsage::default(),
            is_error: false,
            timestamp: Utc::now(),
            metadata: Value::Null,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentBlock::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentBlock::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentBlock::text(text)])
            .with_stop_reason(StopReason::Stop)
    }

    pub fn tool(
        tool_call_id: impl Into<String>,
        text: impl Into<String>,
        is_error: bool,
    ) -> Self {
        let mut message = Self::new(Role::Tool, vec![ContentBlock::text(text)]);
        message.tool_call_id = Some(tool_call_id.into());
        message.is_error = is_error;
        message
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCallRequest>) -> Self {
        self.tool_calls = tool_calls;
        self.stop_reason = StopReason::ToolCall;
        self
    }

    pub fn with_stop_reason(mut self, stop_reason: StopReason) -> Self {
        self.stop_reason = stop_reason;
        self
    }

    pub fn with_usage(mut self, usage: CompletionUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_error(mut self, is_error: bool) -> Self {
        self.is_error = is_error;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Flatten all text blocks into one string.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            if let ContentBlock::Text { text } = block {
                out.push_str(text);
            }
        }
        out
    }

    pub fn metadata_flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_constructors_set_role_and_text() {
        let m = Message::assistant("hello");
        assert_eq!(m.role, Role::Assistant);
        assert_eq!(m.text(), "hello");
        assert_eq!(m.stop_reason, StopReason::Stop);

        let t = Message::tool("call-1", "boom", true);
        assert_eq!(t.role, Role::Tool);
        assert_eq!(t.tool_call_id.as_deref(), Some("call-1"));
        assert!(t.is_error);
    }

    #[test]
    fn test_tool_calls_set_stop_reason() {
        let m = Message::new(Role::Assistant, vec![]).with_tool_calls(vec![
            ToolCallRequest::new("c1", "search", json!({"query": "rust"})),
        ]);
        assert_eq!(m.stop_reason, StopReason::ToolCall);
        assert_eq!(m.tool_calls[0].call_type, "function");
    }

    #[test]
    fn test_text_skips_non_text_blocks() {
        let m = Message::new(
            Role::User,
            vec![
                ContentBlock::text("a"),
                ContentBlock::Image {
                    url: Some("http://example/img.png".to_string()),
                    base64: None,
                },
                ContentBlock::text("b"),
            ],
        );
        assert_eq!(m.text(), "ab");
    }

    #[test]
    fn test_usage_sentinel_and_known() {
        assert!(!CompletionUsage::default().is_known());
        let usage = CompletionUsage::new(10, 5);
        assert!(usage.is_known());
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn test_message_round_trips_through_json() {
        let m = Message::user("ping").with_metadata(json!({"human_interfere": true}));
        let encoded = serde_json::to_string(&m).expect("encode");
        let decoded: Message = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded.text(), "ping");
        assert!(decoded.metadata_flag("human_interfere"));
    }
}
