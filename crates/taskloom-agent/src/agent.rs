//! Agent: observe / think / act wrapped in hook chains
//!
//! An agent hosts one workflow and the three primitives its stage actions
//! call. Each primitive runs its pre/post hook chains in registration
//! order; a hook that interferes produces an error-flagged synthetic
//! message instead of an error, so the surrounding workflow can re-think.
//!
//! `run_once` is the unit a scheduler handler invokes: it resets the
//! workflow and drives it to a terminal stage for one attempt at the task.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use taskloom_core::completion::{CompletionConfig, Tool};
use taskloom_core::context::RunContext;
use taskloom_core::error::AgentError;
use taskloom_core::message::{Message, ToolCallRequest};
use taskloom_core::queue::Queue;
use taskloom_core::state_machine::StateKey;
use taskloom_core::task::Task;
use taskloom_core::workflow::{AgentOps, ObserveFn, Workflow};

use crate::hooks::{
    ActHook, HookChain, HookOutcome, ObserveHook, PostThinkHook, PreThinkHook, TaskHook,
    ToolResultHook,
};
use crate::llm::LlmClient;
use crate::tool::{tools_for_task, ToolService};

/// Default key in the agent's LLM map.
pub const DEFAULT_LLM: &str = "default";

/// Metadata flag set on messages synthesized from hook interference.
pub const HUMAN_INTERFERE_FLAG: &str = "human_interfere";

/// The eight hook registration points of an agent.
#[derive(Default)]
pub struct AgentHooks {
    pub pre_run_once: HookChain<dyn TaskHook>,
    pub post_run_once: HookChain<dyn TaskHook>,
    pub pre_observe: HookChain<dyn TaskHook>,
    pub post_observe: HookChain<dyn ObserveHook>,
    pub pre_think: HookChain<dyn PreThinkHook>,
    pub post_think: HookChain<dyn PostThinkHook>,
    pub pre_act: HookChain<dyn ActHook>,
    pub post_act: HookChain<dyn ToolResultHook>,
}

/// An executor hosting a workflow and the observe/think/act primitives.
pub struct Agent<S: StateKey, E: StateKey> {
    id: String,
    name: String,
    agent_type: String,
    llms: HashMap<String, Arc<dyn LlmClient>>,
    tool_service: Option<Arc<dyn ToolService>>,
    workflow: Mutex<Workflow<S, E>>,
    hooks: AgentHooks,
}

impl<S: StateKey, E: StateKey> Agent<S, E> {
    pub fn new(
        name: impl Into<String>,
        agent_type: impl Into<String>,
        workflow: Workflow<S, E>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            agent_type: agent_type.into(),
            llms: HashMap::new(),
            tool_service: None,
            workflow: Mutex::new(workflow),
            hooks: AgentHooks::default(),
        }
    }

    pub fn with_llm(mut self, name: impl Into<String>, llm: Arc<dyn LlmClient>) -> Self {
        self.llms.insert(name.into(), llm);
        self
    }

    pub fn with_default_llm(self, llm: Arc<dyn LlmClient>) -> Self {
        self.with_llm(DEFAULT_LLM, llm)
    }

    pub fn with_tool_service(mut self, tool_service: Arc<dyn ToolService>) -> Self {
        self.tool_service = Some(tool_service);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    pub fn tool_service(&self) -> Option<&Arc<dyn ToolService>> {
        self.tool_service.as_ref()
    }

    // ---- hook registration ----

    pub fn hooks_mut(&mut self) -> &mut AgentHooks {
        &mut self.hooks
    }

    pub fn add_pre_run_once_hook(&mut self, hook: Arc<dyn TaskHook>) {
        self.hooks.pre_run_once.add(hook);
    }

    pub fn add_post_run_once_hook(&mut self, hook: Arc<dyn TaskHook>) {
        self.hooks.post_run_once.add(hook);
    }

    pub fn add_pre_observe_hook(&mut self, hook: Arc<dyn TaskHook>) {
        self.hooks.pre_observe.add(hook);
    }

    pub fn add_post_observe_hook(&mut self, hook: Arc<dyn ObserveHook>) {
        self.hooks.post_observe.add(hook);
    }

    pub fn add_pre_think_hook(&mut self, hook: Arc<dyn PreThinkHook>) {
        self.hooks.pre_think.add(hook);
    }

    pub fn add_post_think_hook(&mut self, hook: Arc<dyn PostThinkHook>) {
        self.hooks.post_think.add(hook);
    }

    pub fn add_pre_act_hook(&mut self, hook: Arc<dyn ActHook>) {
        self.hooks.pre_act.add(hook);
    }

    pub fn add_post_act_hook(&mut self, hook: Arc<dyn ToolResultHook>) {
        self.hooks.post_act.add(hook);
    }

    // ---- execution ----

    /// One attempt at the task: pre_run_once chain, workflow reset, drive to
    /// a terminal stage, post_run_once chain.
    pub async fn run_once(
        &self,
        ctx: &RunContext,
        queue: &Queue<Message>,
        task: &mut Task,
    ) -> Result<S, AgentError> {
        self.run_task_chain(&self.hooks.pre_run_once, ctx, queue, task).await;

        let mut workflow = self.workflow.lock().await;
        workflow.reset();
        tracing::debug!(agent = %self.name, workflow = %workflow.name(), task_id = %task.id(), "running workflow");
        let last_stage = workflow.run(self, ctx, queue, task).await?;
        drop(workflow);

        self.run_task_chain(&self.hooks.post_run_once, ctx, queue, task).await;
        Ok(last_stage)
    }

    /// Run a task-level hook chain; interference becomes a context message.
    async fn run_task_chain(
        &self,
        chain: &HookChain<dyn TaskHook>,
        ctx: &RunContext,
        queue: &Queue<Message>,
        task: &mut Task,
    ) {
        for hook in chain.iter() {
            if let HookOutcome::Interfere(reason) = hook.call(ctx, queue, task).await {
                tracing::info!(agent = %self.name, hook = %hook.name(), %reason, "hook interfered");
                task.append_context(interfere_message(reason));
            }
        }
    }

    async fn push_to_queue(&self, queue: &Queue<Message>, message: Message) {
        if queue.put(message).await.is_err() {
            tracing::warn!(agent = %self.name, "out queue is closed, dropping message");
        }
    }
}

/// USER message synthesized from hook interference.
fn interfere_message(reason: String) -> Message {
    Message::user(reason)
        .with_error(true)
        .with_metadata(json!({ HUMAN_INTERFERE_FLAG: true }))
}

/// TOOL message synthesized when interference preempts a tool call.
fn interfere_tool_message(tool_call_id: &str, reason: String) -> Message {
    Message::tool(tool_call_id, reason, true)
        .with_metadata(json!({ HUMAN_INTERFERE_FLAG: true }))
}

#[async_trait]
impl<S: StateKey, E: StateKey> AgentOps for Agent<S, E> {
    async fn observe(
        &self,
        ctx: &RunContext,
        queue: &Queue<Message>,
        task: &mut Task,
        observe_fn: Option<&ObserveFn>,
    ) -> Result<Vec<Message>, AgentError> {
        self.run_task_chain(&self.hooks.pre_observe, ctx, queue, task).await;

        if let Some(observe_fn) = observe_fn {
            let projection = observe_fn(task);
            task.append_context(projection);
        }

        let mut observed = Vec::new();
        if !task.protocol().is_empty() {
            observed.push(Message::system(task.protocol()));
        }
        observed.extend(task.context(task.state()).snapshot());

        for hook in self.hooks.post_observe.iter() {
            if let HookOutcome::Interfere(reason) =
                hook.call(ctx, queue, task, &mut observed).await
            {
                tracing::info!(agent = %self.name, hook = %hook.name(), %reason, "post_observe hook interfered");
                observed.push(interfere_message(reason));
            }
        }
        Ok(observed)
    }

    async fn think(
        &self,
        ctx: &RunContext,
        queue: &Queue<Message>,
        llm_name: &str,
        observed: &mut Vec<Message>,
        config: &CompletionConfig,
    ) -> Result<Message, AgentError> {
        for hook in self.hooks.pre_think.iter() {
            if let HookOutcome::Interfere(reason) = hook.call(ctx, queue, observed).await {
                tracing::info!(agent = %self.name, hook = %hook.name(), %reason, "pre_think hook interfered");
                return Ok(interfere_message(reason));
            }
        }

        let llm = self
            .llms
            .get(llm_name)
            .ok_or_else(|| AgentError::UnknownLlm(llm_name.to_string()))?;
        let stream = config.stream.then_some(queue);
        let mut reply = llm
            .completion(observed, config, stream)
            .await
            .map_err(|error| AgentError::Llm(error.to_string()))?;

        for hook in self.hooks.post_think.iter() {
            if let HookOutcome::Interfere(reason) =
                hook.call(ctx, queue, observed, &mut reply).await
            {
                tracing::info!(agent = %self.name, hook = %hook.name(), %reason, "post_think hook interfered");
                return Ok(interfere_message(reason));
            }
        }

        self.push_to_queue(queue, reply.clone()).await;
        Ok(reply)
    }

    async fn act(
        &self,
        ctx: &RunContext,
        queue: &Queue<Message>,
        tool_call: &ToolCallRequest,
        task: &mut Task,
        end_tool: Option<&str>,
    ) -> Result<Message, AgentError> {
        let mut preempted = None;
        for hook in self.hooks.pre_act.iter() {
            if let HookOutcome::Interfere(reason) = hook.call(ctx, queue, task, tool_call).await {
                tracing::info!(agent = %self.name, hook = %hook.name(), %reason, "pre_act hook interfered");
                preempted = Some(interfere_tool_message(&tool_call.id, reason));
                break;
            }
        }

        let mut result = match preempted {
            Some(message) => message,
            None if end_tool == Some(tool_call.name.as_str()) => {
                end_workflow_result(tool_call, task)
            }
            None => match &self.tool_service {
                Some(service) => {
                    tracing::debug!(agent = %self.name, tool = %tool_call.name, "calling tool service");
                    let mut message = service.call(&tool_call.name, &tool_call.args).await;
                    message.tool_call_id = Some(tool_call.id.clone());
                    message
                }
                None => Message::tool(
                    tool_call.id.clone(),
                    format!("tool `{}` is unavailable: no tool service configured", tool_call.name),
                    true,
                ),
            },
        };

        task.append_context(result.clone());

        for hook in self.hooks.post_act.iter() {
            if let HookOutcome::Interfere(reason) =
                hook.call(ctx, queue, task, &mut result).await
            {
                tracing::info!(agent = %self.name, hook = %hook.name(), %reason, "post_act hook interfered");
                result = interfere_tool_message(&tool_call.id, reason);
            }
        }

        self.push_to_queue(queue, result.clone()).await;
        Ok(result)
    }

    async fn advertised_tools(&self, task: &Task) -> Vec<Tool> {
        match &self.tool_service {
            Some(service) => tools_for_task(service.list_tools().await, task),
            None => Vec::new(),
        }
    }
}

/// Complete the task from an `end_workflow` pseudo-tool call. The output
/// comes from the call's `output` argument, falling back to the last
/// assistant message in the running context.
fn end_workflow_result(tool_call: &ToolCallRequest, task: &mut Task) -> Message {
    let output = tool_call
        .args
        .get("output")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            task.context(task.state())
                .snapshot()
                .iter()
                .rev()
                .find(|m| m.role == taskloom_core::message::Role::Assistant)
                .map(|m| m.text())
        })
        .filter(|text| !text.trim().is_empty());

    match output {
        Some(output) => {
            task.set_completed(output);
            Message::tool(tool_call.id.clone(), "workflow finished", false)
        }
        None => Message::tool(
            tool_call.id.clone(),
            "end_workflow was called without an `output` argument and no assistant output is available",
            true,
        ),
    }
}

/// Object-safe seam between a scheduler handler and an agent: one attempt
/// at the task, terminal stage discarded.
#[async_trait]
pub trait TaskAgent: Send + Sync {
    fn name(&self) -> &str;

    async fn run_task(
        &self,
        ctx: &RunContext,
        queue: &Queue<Message>,
        task: &mut Task,
    ) -> Result<(), AgentError>;
}

#[async_trait]
impl<S: StateKey, E: StateKey> TaskAgent for Agent<S, E> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_task(
        &self,
        ctx: &RunContext,
        queue: &Queue<Message>,
        task: &mut Task,
    ) -> Result<(), AgentError> {
        self.run_once(ctx, queue, task).await.map(|_| ())
    }
}
