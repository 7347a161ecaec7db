//! Built-in orchestration workflow
//!
//! Plans sub-tasks for a tree node: a thinking stage gathers whatever the
//! LLM needs (may call tools), an orchestrating stage requests a strict
//! JSON sub-task list. LLM quirks (code fences, trailing commas) are
//! normalized away before parsing; output that still does not parse sends
//! the workflow back to thinking instead of crashing the run.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use taskloom_core::completion::CompletionConfig;
use taskloom_core::error::{AgentError, CompileError};
use taskloom_core::message::{Message, StopReason};
use taskloom_core::workflow::{ObserveFn, StageAction, StageContext, Workflow};

use crate::agent::{DEFAULT_LLM, HUMAN_INTERFERE_FLAG};
use crate::react::LLM_LABEL;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrchestrateStage {
    Thinking,
    Orchestrating,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrchestrateEvent {
    Think,
    Orchestrate,
    Finish,
}

/// One planned sub-task, as produced by the orchestrating LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTaskSpec {
    pub task_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub input: String,
}

/// Strip code fences and trailing commas that LLMs habitually emit, then
/// hand the result to the strict parser.
pub fn normalize_llm_json(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```") {
        // Drop the info string of the opening fence and the closing fence.
        let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
        text = rest.trim_end().strip_suffix("```").unwrap_or(rest).trim();
    }

    // Remove trailing commas outside of strings.
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        match c {
            '"' if !escaped => in_string = !in_string,
            ']' | '}' if !in_string => {
                while out.ends_with(|t: char| t.is_whitespace() || t == ',') {
                    out.pop();
                }
            }
            _ => {}
        }
        escaped = c == '\\' && !escaped;
        out.push(c);
    }
    out
}

/// Parse the orchestrator's reply into sub-task specs. Accepts a bare array
/// or an object carrying a `sub_tasks` array.
pub fn parse_sub_task_specs(raw: &str) -> Result<Vec<SubTaskSpec>, String> {
    let normalized = normalize_llm_json(raw);
    let value: serde_json::Value = serde_json::from_str(&normalized)
        .map_err(|error| format!("sub-task json does not parse: {error}"))?;
    let array = match value {
        serde_json::Value::Array(items) => serde_json::Value::Array(items),
        serde_json::Value::Object(mut object) => object
            .remove("sub_tasks")
            .ok_or_else(|| "sub-task json object carries no `sub_tasks` array".to_string())?,
        _ => return Err("sub-task json must be an array or an object".to_string()),
    };
    let specs: Vec<SubTaskSpec> = serde_json::from_value(array)
        .map_err(|error| format!("sub-task entries are malformed: {error}"))?;
    if specs.is_empty() {
        return Err("the orchestrator produced no sub-tasks".to_string());
    }
    Ok(specs)
}

struct ThinkingAction;

#[async_trait]
impl StageAction<OrchestrateStage, OrchestrateEvent> for ThinkingAction {
    async fn run(
        &self,
        cx: StageContext<'_, OrchestrateStage, OrchestrateEvent>,
    ) -> Result<OrchestrateEvent, AgentError> {
        let StageContext {
            agent,
            workflow,
            ctx,
            queue,
            task,
        } = cx;

        if let Some(prompt) = workflow.prompt() {
            task.append_context(Message::user(prompt));
        }
        let mut observed = agent.observe(ctx, queue, task, workflow.observe_fn()).await?;
        let mut config = workflow.completion_config();
        config.tools.extend(agent.advertised_tools(task).await);
        let llm_name = workflow
            .labels()
            .get(LLM_LABEL)
            .map(String::as_str)
            .unwrap_or(DEFAULT_LLM);
        let reply = agent.think(ctx, queue, llm_name, &mut observed, &config).await?;
        task.append_context(reply.clone());

        if reply.is_error {
            return Ok(OrchestrateEvent::Think);
        }

        if reply.stop_reason == StopReason::ToolCall {
            for tool_call in &reply.tool_calls {
                let result = agent.act(ctx, queue, tool_call, task, None).await?;
                if result.is_error {
                    if !result.metadata_flag(HUMAN_INTERFERE_FLAG) {
                        task.set_error(result.text());
                    }
                    return Ok(OrchestrateEvent::Think);
                }
            }
            // Tool results feed the next thinking pass.
            return Ok(OrchestrateEvent::Think);
        }

        Ok(OrchestrateEvent::Orchestrate)
    }
}

struct OrchestratingAction;

#[async_trait]
impl StageAction<OrchestrateStage, OrchestrateEvent> for OrchestratingAction {
    async fn run(
        &self,
        cx: StageContext<'_, OrchestrateStage, OrchestrateEvent>,
    ) -> Result<OrchestrateEvent, AgentError> {
        let StageContext {
            agent,
            workflow,
            ctx,
            queue,
            task,
        } = cx;

        if let Some(prompt) = workflow.prompt() {
            task.append_context(Message::user(prompt));
        }
        let mut observed = agent.observe(ctx, queue, task, workflow.observe_fn()).await?;
        let config = workflow.completion_config().with_format_json(true);
        let llm_name = workflow
            .labels()
            .get(LLM_LABEL)
            .map(String::as_str)
            .unwrap_or(DEFAULT_LLM);
        let reply = agent.think(ctx, queue, llm_name, &mut observed, &config).await?;
        task.append_context(reply.clone());

        if reply.is_error {
            return Ok(OrchestrateEvent::Think);
        }

        match parse_sub_task_specs(&reply.text()) {
            Ok(_) => {
                task.clean_error();
                Ok(OrchestrateEvent::Finish)
            }
            Err(reason) => {
                task.set_error(reason.clone());
                task.append_context(Message::user(reason).with_error(true));
                Ok(OrchestrateEvent::Think)
            }
        }
    }
}

/// Build the planner workflow. The final assistant message of the current
/// state's context carries the validated sub-task JSON; the scheduler
/// materializes it into tree children.
pub fn orchestrate_workflow(
    thinking_prompt: impl Into<String>,
    orchestrating_prompt: impl Into<String>,
    observe_fn: Option<ObserveFn>,
    config: CompletionConfig,
    max_plan_loops: u32,
) -> Result<Workflow<OrchestrateStage, OrchestrateEvent>, CompileError> {
    let mut builder = Workflow::builder(
        "orchestrate",
        [
            OrchestrateStage::Thinking,
            OrchestrateStage::Orchestrating,
            OrchestrateStage::Finished,
        ],
        OrchestrateStage::Thinking,
        [OrchestrateStage::Finished],
    )
    .transition(OrchestrateStage::Thinking, OrchestrateEvent::Think, OrchestrateStage::Thinking)
    .transition(
        OrchestrateStage::Thinking,
        OrchestrateEvent::Orchestrate,
        OrchestrateStage::Orchestrating,
    )
    .transition(
        OrchestrateStage::Orchestrating,
        OrchestrateEvent::Think,
        OrchestrateStage::Thinking,
    )
    .transition(
        OrchestrateStage::Orchestrating,
        OrchestrateEvent::Finish,
        OrchestrateStage::Finished,
    )
    .event_chain([
        OrchestrateEvent::Think,
        OrchestrateEvent::Orchestrate,
        OrchestrateEvent::Finish,
    ])
    .action(OrchestrateStage::Thinking, Arc::new(ThinkingAction))
    .action(OrchestrateStage::Orchestrating, Arc::new(OrchestratingAction))
    .prompt(OrchestrateStage::Thinking, thinking_prompt)
    .prompt(OrchestrateStage::Orchestrating, orchestrating_prompt)
    .completion_config(OrchestrateStage::Thinking, config.clone())
    .completion_config(OrchestrateStage::Orchestrating, config);

    if let Some(observe_fn) = observe_fn {
        builder = builder
            .observe_fn(OrchestrateStage::Thinking, observe_fn.clone())
            .observe_fn(OrchestrateStage::Orchestrating, observe_fn);
    }
    builder.compile(max_plan_loops)
}
