//! Tool service interface
//!
//! An external capability broker: given a name and arguments it returns a
//! TOOL message. Failures are expressed on the message (`is_error`), never
//! as Rust errors, so the workflow's retry logic stays in one place.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use taskloom_core::completion::Tool;
use taskloom_core::message::{ContentBlock, Message, Role};
use taskloom_core::task::Task;

/// Handler backing one registered tool.
pub type ToolHandler = Arc<dyn Fn(&Value) -> Result<String, String> + Send + Sync>;

#[async_trait]
pub trait ToolService: Send + Sync {
    /// Advertise every registered tool.
    async fn list_tools(&self) -> Vec<Tool>;

    /// Invoke one tool. The returned message has role TOOL and `is_error`
    /// set on failure; the caller stamps the `tool_call_id`.
    async fn call(&self, name: &str, args: &Value) -> Message;
}

/// Tools a task may see: untagged tools are visible to everyone, tagged
/// tools only to tasks whose tag set covers them.
pub fn tools_for_task(tools: Vec<Tool>, task: &Task) -> Vec<Tool> {
    tools
        .into_iter()
        .filter(|tool| tool.tags.is_subset(task.tags()))
        .collect()
}

/// In-memory tool service: a name → handler map, used by tests and small
/// embeddings.
#[derive(Default)]
pub struct StaticToolService {
    tools: Vec<Tool>,
    handlers: HashMap<String, ToolHandler>,
}

impl StaticToolService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Tool, handler: ToolHandler) {
        self.handlers.insert(tool.name.clone(), handler);
        self.tools.push(tool);
    }

    pub fn with_tool(mut self, tool: Tool, handler: ToolHandler) -> Self {
        self.register(tool, handler);
        self
    }
}

#[async_trait]
impl ToolService for StaticToolService {
    async fn list_tools(&self) -> Vec<Tool> {
        self.tools.clone()
    }

    async fn call(&self, name: &str, args: &Value) -> Message {
        match self.handlers.get(name) {
            Some(handler) => match handler(args) {
                Ok(text) => Message::new(Role::Tool, vec![ContentBlock::text(text)]),
                Err(reason) => {
                    Message::new(Role::Tool, vec![ContentBlock::text(reason)]).with_error(true)
                }
            },
            None => Message::new(
                Role::Tool,
                vec![ContentBlock::text(format!("tool `{name}` is not registered"))],
            )
            .with_error(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_service() -> StaticToolService {
        StaticToolService::new().with_tool(
            Tool::new("echo", "repeat the input"),
            Arc::new(|args| {
                args.get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| "missing `text` argument".to_string())
            }),
        )
    }

    #[tokio::test]
    async fn test_call_returns_tool_message() {
        let service = echo_service();
        let result = service.call("echo", &json!({"text": "hi"})).await;
        assert_eq!(result.role, Role::Tool);
        assert_eq!(result.text(), "hi");
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn test_handler_failure_flags_the_message() {
        let service = echo_service();
        let result = service.call("echo", &json!({})).await;
        assert!(result.is_error);
        assert!(result.text().contains("missing"));
    }

    #[tokio::test]
    async fn test_unknown_tool_flags_the_message() {
        let service = echo_service();
        let result = service.call("nope", &json!({})).await;
        assert!(result.is_error);
        assert!(result.text().contains("not registered"));
    }

    #[test]
    fn test_tools_for_task_filters_by_tag_subset() {
        let task = Task::new("qa", "").with_tags(["web".to_string()]);
        let tools = vec![
            Tool::new("open", "untagged"),
            Tool::new("search", "tagged").with_tags(["web".to_string()]),
            Tool::new("shell", "tagged").with_tags(["system".to_string()]),
        ];
        let names: Vec<String> = tools_for_task(tools, &task)
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["open".to_string(), "search".to_string()]);
    }
}
