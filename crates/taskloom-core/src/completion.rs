//! Completion configuration and tool descriptors

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Description of a callable tool, advertised to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool arguments.
    #[serde(default)]
    pub parameters: Value,
    /// Tools are advertised only to tasks whose tags cover these.
    #[serde(default)]
    pub tags: HashSet<String>,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Value::Null,
            tags: HashSet::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }
}

/// Knobs forwarded to the LLM adapter for one completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub frequency_penalty: f32,
    /// Request a strict JSON object response.
    pub format_json: bool,
    /// Provider-specific thinking mode toggle.
    pub allow_thinking: bool,
    pub stream: bool,
    #[serde(default)]
    pub stop_words: Vec<String>,
    #[serde(default)]
    pub tools: Vec<Tool>,
    #[serde(default)]
    pub exclude_tools: HashSet<String>,
    /// Force the named tool when set.
    #[serde(default)]
    pub tool_choice: Option<String>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.9,
            top_p: 1.0,
            max_tokens: 8192,
            frequency_penalty: 1.0,
            format_json: false,
            allow_thinking: true,
            stream: false,
            stop_words: Vec::new(),
            tools: Vec::new(),
            exclude_tools: HashSet::new(),
            tool_choice: None,
        }
    }
}

impl CompletionConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_format_json(mut self, format_json: bool) -> Self {
        self.format_json = format_json;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_exclude_tools(mut self, exclude: impl IntoIterator<Item = String>) -> Self {
        self.exclude_tools = exclude.into_iter().collect();
        self
    }

    pub fn with_tool_choice(mut self, tool: impl Into<String>) -> Self {
        self.tool_choice = Some(tool.into());
        self
    }

    /// Tools after applying the exclusion set.
    pub fn effective_tools(&self) -> Vec<&Tool> {
        self.tools
            .iter()
            .filter(|t| !self.exclude_tools.contains(&t.name))
            .collect()
    }
}
