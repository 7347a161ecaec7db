//! Per-run execution context
//!
//! Carries caller identity and free-form values (access tokens, routing
//! hints) through handlers, hooks and agent primitives. The core never
//! interprets the values; they exist for extensions.

use std::collections::HashMap;

use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RunContext {
    pub user_id: String,
    pub trace_id: String,
    values: HashMap<String, Value>,
}

impl RunContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            trace_id: Uuid::new_v4().to_string(),
            values: HashMap::new(),
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new("anonymous")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_values_round_trip() {
        let mut ctx = RunContext::new("user-1").with_trace_id("trace-1");
        ctx.insert("access_token", json!("secret"));
        assert_eq!(ctx.user_id, "user-1");
        assert_eq!(ctx.trace_id, "trace-1");
        assert_eq!(ctx.get("access_token"), Some(&json!("secret")));
        assert!(ctx.get("missing").is_none());
    }
}
