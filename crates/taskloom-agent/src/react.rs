//! Built-in ReAct executor workflow
//!
//! One stage loops observe → think → act until the LLM stops calling tools
//! or invokes the `end_workflow` pseudo-tool. Outcome per pass:
//! - interference or a recoverable think error: re-enter the reasoning
//!   stage (consumes workflow revisit budget)
//! - a failed tool call: record the error on the task and finish the
//!   attempt, leaving the retry decision to the scheduler
//! - a plain completion or `end_workflow`: store the output and finish

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use taskloom_core::completion::{CompletionConfig, Tool};
use taskloom_core::error::{AgentError, CompileError};
use taskloom_core::message::{Message, StopReason};
use taskloom_core::workflow::{ObserveFn, StageAction, StageContext, Workflow};

use crate::agent::{DEFAULT_LLM, HUMAN_INTERFERE_FLAG};

pub const END_WORKFLOW_TOOL: &str = "end_workflow";

/// Workflow label naming the LLM to route think calls to.
pub const LLM_LABEL: &str = "llm";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReactStage {
    Reasoning,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReactEvent {
    Reason,
    Finish,
}

/// Descriptor of the pseudo-tool that ends the workflow gracefully.
pub fn end_workflow_tool() -> Tool {
    Tool::new(
        END_WORKFLOW_TOOL,
        "Finish the current task and hand back its final output.",
    )
    .with_parameters(json!({
        "type": "object",
        "properties": {
            "output": {
                "type": "string",
                "description": "The final output of the task."
            }
        },
        "required": ["output"]
    }))
}

struct ReasoningAction;

#[async_trait]
impl StageAction<ReactStage, ReactEvent> for ReasoningAction {
    async fn run(
        &self,
        cx: StageContext<'_, ReactStage, ReactEvent>,
    ) -> Result<ReactEvent, AgentError> {
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
            // Interference or a recoverable think failure: think again with
            // the feedback in context.
            return Ok(ReactEvent::Reason);
        }

        if reply.stop_reason == StopReason::ToolCall {
            let mut interfered = false;
            for tool_call in &reply.tool_calls {
                let result = agent
                    .act(ctx, queue, tool_call, task, workflow.end_workflow_tool())
                    .await?;
                if result.is_error {
                    if result.metadata_flag(HUMAN_INTERFERE_FLAG) {
                        interfered = true;
                    } else {
                        task.set_error(result.text());
                    }
                    // Later calls in the same reply are not executed once one
                    // has gone wrong.
                    break;
                }
            }
            if task.is_completed() {
                return Ok(ReactEvent::Finish);
            }
            if interfered {
                return Ok(ReactEvent::Reason);
            }
            if task.is_error() {
                return Ok(ReactEvent::Finish);
            }
            return Ok(ReactEvent::Reason);
        }

        // A plain completion carries the final output in its text.
        let text = reply.text();
        if text.trim().is_empty() {
            task.set_error("the llm returned an empty completion");
        } else {
            task.set_completed(text);
        }
        Ok(ReactEvent::Finish)
    }
}

/// Build the executor workflow: a reasoning loop bounded by
/// `max_think_loops` revisits, ended by `end_workflow` or a plain reply.
pub fn react_workflow(
    prompt: impl Into<String>,
    observe_fn: Option<ObserveFn>,
    config: CompletionConfig,
    max_think_loops: u32,
) -> Result<Workflow<ReactStage, ReactEvent>, CompileError> {
    let mut config = config;
    config.tools.push(end_workflow_tool());

    let mut builder = Workflow::builder(
        "react",
        [ReactStage::Reasoning, ReactStage::Finished],
        ReactStage::Reasoning,
        [ReactStage::Finished],
    )
    .transition(ReactStage::Reasoning, ReactEvent::Reason, ReactStage::Reasoning)
    .transition(ReactStage::Reasoning, ReactEvent::Finish, ReactStage::Finished)
    .event_chain([ReactEvent::Reason, ReactEvent::Finish])
    .action(ReactStage::Reasoning, Arc::new(ReasoningAction))
    .prompt(ReactStage::Reasoning, prompt)
    .completion_config(ReactStage::Reasoning, config)
    .end_workflow_tool(END_WORKFLOW_TOOL);

    if let Some(observe_fn) = observe_fn {
        builder = builder.observe_fn(ReactStage::Reasoning, observe_fn);
    }
    builder.compile(max_think_loops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::llm::MockLlm;
    use crate::tool::StaticToolService;
    use serde_json::Value;
    use taskloom_core::context::RunContext;
    use taskloom_core::message::{Role, ToolCallRequest};
    use taskloom_core::queue::Queue;
    use taskloom_core::task::{Task, TaskEvent, TaskState};

    async fn running_task() -> Task {
        let mut task = Task::new("qa", "answer in plain text");
        task.handle_event(TaskEvent::Planned).await.expect("plan");
        task
    }

    fn agent_with(replies: Vec<Message>) -> Agent<ReactStage, ReactEvent> {
        let workflow = react_workflow(
            "Work on the task.",
            None,
            CompletionConfig::default(),
            4,
        )
        .expect("compile");
        Agent::new("executor", "react", workflow)
            .with_default_llm(Arc::new(MockLlm::with_replies(replies)))
    }

    #[tokio::test]
    async fn test_plain_reply_completes_the_task() {
        let agent = agent_with(vec![Message::assistant("4")]);
        let mut task = running_task().await;
        let queue = Queue::default();

        let stage = agent
            .run_once(&RunContext::default(), &queue, &mut task)
            .await
            .expect("run");
        assert_eq!(stage, ReactStage::Finished);
        assert!(task.is_completed());
        assert_eq!(task.output(), Some("4"));
        assert!(!task.is_error());
    }

    #[tokio::test]
    async fn test_end_workflow_call_completes_the_task() {
        let agent = agent_with(vec![Message::new(Role::Assistant, vec![]).with_tool_calls(
            vec![ToolCallRequest::new(
                "call-1",
                END_WORKFLOW_TOOL,
                json!({"output": "done"}),
            )],
        )]);
        let mut task = running_task().await;
        let queue = Queue::default();

        agent
            .run_once(&RunContext::default(), &queue, &mut task)
            .await
            .expect("run");
        assert_eq!(task.output(), Some("done"));
    }

    #[tokio::test]
    async fn test_tool_error_finishes_the_attempt_with_task_error() {
        let workflow = react_workflow("Work.", None, CompletionConfig::default(), 4)
            .expect("compile");
        let service = StaticToolService::new().with_tool(
            Tool::new("search", "always fails"),
            Arc::new(|_: &Value| Err("search backend unavailable".to_string())),
        );
        let agent = Agent::new("executor", "react", workflow)
            .with_default_llm(Arc::new(MockLlm::with_replies([
                Message::new(Role::Assistant, vec![]).with_tool_calls(vec![
                    ToolCallRequest::new("call-1", "search", json!({"query": "x"})),
                ]),
            ])))
            .with_tool_service(Arc::new(service));

        let mut task = running_task().await;
        let queue = Queue::default();
        let stage = agent
            .run_once(&RunContext::default(), &queue, &mut task)
            .await
            .expect("run");
        assert_eq!(stage, ReactStage::Finished);
        assert!(task.is_error());
        assert!(task.error_info().unwrap_or("").contains("unavailable"));
        assert!(!task.is_completed());
    }

    #[tokio::test]
    async fn test_successful_tool_call_loops_back_into_reasoning() {
        let service = StaticToolService::new().with_tool(
            Tool::new("search", "finds things"),
            Arc::new(|_: &Value| Ok("three results".to_string())),
        );
        let workflow = react_workflow("Work.", None, CompletionConfig::default(), 4)
            .expect("compile");
        let agent = Agent::new("executor", "react", workflow)
            .with_default_llm(Arc::new(MockLlm::with_replies([
                Message::new(Role::Assistant, vec![]).with_tool_calls(vec![
                    ToolCallRequest::new("call-1", "search", json!({"query": "x"})),
                ]),
                Message::assistant("summary of three results"),
            ])))
            .with_tool_service(Arc::new(service));

        let mut task = running_task().await;
        let queue = Queue::default();
        agent
            .run_once(&RunContext::default(), &queue, &mut task)
            .await
            .expect("run");
        assert_eq!(task.output(), Some("summary of three results"));
        // Context shows prompt, tool round and final reply in order.
        let roles: Vec<Role> = task
            .context(TaskState::Running)
            .snapshot()
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::User, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn test_runaway_reasoning_hits_the_cycle_limit() {
        let service = StaticToolService::new().with_tool(
            Tool::new("noop", "does nothing"),
            Arc::new(|_: &Value| Ok("ok".to_string())),
        );
        let tool_reply = || {
            Message::new(Role::Assistant, vec![]).with_tool_calls(vec![ToolCallRequest::new(
                "call",
                "noop",
                json!({}),
            )])
        };
        let workflow = react_workflow("Work.", None, CompletionConfig::default(), 1)
            .expect("compile");
        let agent = Agent::new("executor", "react", workflow)
            .with_default_llm(Arc::new(MockLlm::with_replies([
                tool_reply(),
                tool_reply(),
                tool_reply(),
            ])))
            .with_tool_service(Arc::new(service));

        let mut task = running_task().await;
        let queue = Queue::default();
        let result = agent.run_once(&RunContext::default(), &queue, &mut task).await;
        assert!(matches!(result, Err(AgentError::Machine(_))));
    }
}
