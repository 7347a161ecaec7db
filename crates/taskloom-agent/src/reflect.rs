//! Built-in Reflect executor workflow
//!
//! A drafting stage reasons (and may call tools) exactly like ReAct, but
//! every draft passes through a reflecting stage before the attempt can
//! finish. The critique either approves — by calling `end_workflow` or by
//! answering with a `<finish>true</finish>` flag, which promotes the last
//! draft to the task output — or sends the workflow back to reasoning with
//! its objections in context. The revisit budget bounds revision rounds.

use std::sync::Arc;

use async_trait::async_trait;

use taskloom_core::completion::CompletionConfig;
use taskloom_core::error::{AgentError, CompileError};
use taskloom_core::message::{Message, Role, StopReason};
use taskloom_core::workflow::{ObserveFn, StageAction, StageContext, Workflow};

use crate::agent::{DEFAULT_LLM, HUMAN_INTERFERE_FLAG};
use crate::react::{end_workflow_tool, LLM_LABEL, END_WORKFLOW_TOOL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReflectStage {
    Reasoning,
    Reflecting,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReflectEvent {
    Reason,
    Reflect,
    Finish,
}

const FINISH_LABELS: [&str; 3] = ["finish", "finish_flag", "finish_workflow"];

/// Extract the content of the first `<label>…</label>` pair.
fn extract_by_label<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    let open = format!("<{label}>");
    let close = format!("</{label}>");
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(&text[start..end])
}

/// Whether a reflection reply carries an affirmative finish flag.
fn finish_flag(text: &str) -> bool {
    FINISH_LABELS.iter().any(|label| {
        extract_by_label(text, label)
            .map(|content| content.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    })
}

struct ReflectReasoningAction;

#[async_trait]
impl StageAction<ReflectStage, ReflectEvent> for ReflectReasoningAction {
    async fn run(
        &self,
        cx: StageContext<'_, ReflectStage, ReflectEvent>,
    ) -> Result<ReflectEvent, AgentError> {
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
            return Ok(ReflectEvent::Reason);
        }

        if reply.stop_reason == StopReason::ToolCall {
            for tool_call in &reply.tool_calls {
                let result = agent
                    .act(ctx, queue, tool_call, task, workflow.end_workflow_tool())
                    .await?;
                if result.is_error {
                    if result.metadata_flag(HUMAN_INTERFERE_FLAG) {
                        return Ok(ReflectEvent::Reason);
                    }
                    task.set_error(result.text());
                    return Ok(ReflectEvent::Finish);
                }
            }
            if task.is_completed() {
                return Ok(ReflectEvent::Finish);
            }
            // Tool results feed another drafting pass before review.
            return Ok(ReflectEvent::Reason);
        }

        // The draft stands in context; hand it to the critique.
        Ok(ReflectEvent::Reflect)
    }
}

struct ReflectingAction;

#[async_trait]
impl StageAction<ReflectStage, ReflectEvent> for ReflectingAction {
    async fn run(
        &self,
        cx: StageContext<'_, ReflectStage, ReflectEvent>,
    ) -> Result<ReflectEvent, AgentError> {
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
        // The critique only gets the end-workflow pseudo-tool.
        let config = workflow.completion_config();
        let llm_name = workflow
            .labels()
            .get(LLM_LABEL)
            .map(String::as_str)
            .unwrap_or(DEFAULT_LLM);
        let reply = agent.think(ctx, queue, llm_name, &mut observed, &config).await?;
        task.append_context(reply.clone());

        if reply.is_error {
            return Ok(ReflectEvent::Reason);
        }

        if reply.stop_reason == StopReason::ToolCall {
            for tool_call in &reply.tool_calls {
                let result = agent
                    .act(ctx, queue, tool_call, task, workflow.end_workflow_tool())
                    .await?;
                if result.is_error {
                    if result.metadata_flag(HUMAN_INTERFERE_FLAG) {
                        return Ok(ReflectEvent::Reason);
                    }
                    task.set_error(result.text());
                    return Ok(ReflectEvent::Finish);
                }
            }
            if task.is_completed() {
                return Ok(ReflectEvent::Finish);
            }
            return Ok(ReflectEvent::Reason);
        }

        if finish_flag(&reply.text()) {
            // Promote the approved draft: the last clean assistant message
            // before this critique.
            let draft = task
                .context(task.state())
                .snapshot()
                .iter()
                .rev()
                .filter(|m| m.role == Role::Assistant && !m.is_error && m.id != reply.id)
                .map(|m| m.text())
                .find(|text| !text.trim().is_empty());
            return match draft {
                Some(draft) => {
                    task.set_completed(draft);
                    Ok(ReflectEvent::Finish)
                }
                None => {
                    task.set_error("the critique approved but no draft is available");
                    Ok(ReflectEvent::Finish)
                }
            };
        }

        // The objections stay in context for the next drafting pass.
        Ok(ReflectEvent::Reason)
    }
}

/// Build the draft-and-critique workflow. `max_revision_loops` bounds how
/// often either stage may be re-entered.
pub fn reflect_workflow(
    reasoning_prompt: impl Into<String>,
    reflecting_prompt: impl Into<String>,
    observe_fn: Option<ObserveFn>,
    config: CompletionConfig,
    max_revision_loops: u32,
) -> Result<Workflow<ReflectStage, ReflectEvent>, CompileError> {
    let reflecting_config = config
        .clone()
        .with_tools(vec![end_workflow_tool()]);

    let mut builder = Workflow::builder(
        "reflect",
        [
            ReflectStage::Reasoning,
            ReflectStage::Reflecting,
            ReflectStage::Finished,
        ],
        ReflectStage::Reasoning,
        [ReflectStage::Finished],
    )
    .transition(ReflectStage::Reasoning, ReflectEvent::Reason, ReflectStage::Reasoning)
    .transition(ReflectStage::Reasoning, ReflectEvent::Reflect, ReflectStage::Reflecting)
    .transition(ReflectStage::Reasoning, ReflectEvent::Finish, ReflectStage::Finished)
    .transition(ReflectStage::Reflecting, ReflectEvent::Reason, ReflectStage::Reasoning)
    .transition(ReflectStage::Reflecting, ReflectEvent::Finish, ReflectStage::Finished)
    .event_chain([ReflectEvent::Reason, ReflectEvent::Reflect, ReflectEvent::Finish])
    .action(ReflectStage::Reasoning, Arc::new(ReflectReasoningAction))
    .action(ReflectStage::Reflecting, Arc::new(ReflectingAction))
    .prompt(ReflectStage::Reasoning, reasoning_prompt)
    .prompt(ReflectStage::Reflecting, reflecting_prompt)
    .completion_config(ReflectStage::Reasoning, config)
    .completion_config(ReflectStage::Reflecting, reflecting_config)
    .end_workflow_tool(END_WORKFLOW_TOOL);

    if let Some(observe_fn) = observe_fn {
        builder = builder
            .observe_fn(ReflectStage::Reasoning, observe_fn.clone())
            .observe_fn(ReflectStage::Reflecting, observe_fn);
    }
    builder.compile(max_revision_loops)
}
