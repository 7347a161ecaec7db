//! Self-driving workflow machine
//!
//! A workflow describes how one attempt at a task is executed: a state
//! machine over stages whose actions return the next workflow event, driven
//! in a loop until a terminal stage. Compilation additionally proves that
//! the declared event chain walks from the initial stage into a terminal
//! one, so a compiled workflow cannot fail to terminate by construction
//! (the revisit budget bounds retry loops at runtime).
//!
//! The workflow never touches the task lifecycle; it only mutates the
//! Running context buffer through the agent primitives behind [`AgentOps`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::completion::{CompletionConfig, Tool};
use crate::context::RunContext;
use crate::error::{AgentError, CompileError, MachineError};
use crate::message::{Message, ToolCallRequest};
use crate::queue::Queue;
use crate::state_machine::{StateKey, StateMachine, TransitionAction};
use crate::task::Task;

/// Projection of a task into one observation message.
pub type ObserveFn = Arc<dyn Fn(&Task) -> Message + Send + Sync>;

/// The agent primitives workflow actions are written against.
///
/// Tool failures and human interference come back as error-flagged
/// messages; only structural problems use the error channel.
#[async_trait]
pub trait AgentOps: Send + Sync {
    /// Gather the conversation context to feed the LLM.
    async fn observe(
        &self,
        ctx: &RunContext,
        queue: &Queue<Message>,
        task: &mut Task,
        observe_fn: Option<&ObserveFn>,
    ) -> Result<Vec<Message>, AgentError>;

    /// Run one completion against the named LLM.
    async fn think(
        &self,
        ctx: &RunContext,
        queue: &Queue<Message>,
        llm_name: &str,
        observed: &mut Vec<Message>,
        config: &CompletionConfig,
    ) -> Result<Message, AgentError>;

    /// Invoke one tool call; `end_tool` names the pseudo-tool that completes
    /// the task instead of reaching the tool service.
    async fn act(
        &self,
        ctx: &RunContext,
        queue: &Queue<Message>,
        tool_call: &ToolCallRequest,
        task: &mut Task,
        end_tool: Option<&str>,
    ) -> Result<Message, AgentError>;

    /// Tools the agent advertises for this task (tag filtered).
    async fn advertised_tools(&self, task: &Task) -> Vec<Tool>;
}

/// Everything a stage action may touch during one step.
pub struct StageContext<'a, S: StateKey, E: StateKey> {
    pub agent: &'a dyn AgentOps,
    pub workflow: &'a Workflow<S, E>,
    pub ctx: &'a RunContext,
    pub queue: &'a Queue<Message>,
    pub task: &'a mut Task,
}

/// One stage of a workflow: does its work and returns the next event.
#[async_trait]
pub trait StageAction<S: StateKey, E: StateKey>: Send + Sync {
    async fn run(&self, cx: StageContext<'_, S, E>) -> Result<E, AgentError>;
}

/// A compiled, self-driving event-chain state machine.
pub struct Workflow<S: StateKey, E: StateKey> {
    machine: StateMachine<S, E>,
    name: String,
    event_chain: Vec<E>,
    actions: HashMap<S, Arc<dyn StageAction<S, E>>>,
    prompts: HashMap<S, String>,
    observe_fns: HashMap<S, ObserveFn>,
    completion_configs: HashMap<S, CompletionConfig>,
    labels: HashMap<String, String>,
    end_workflow_tool: Option<String>,
}

impl<S: StateKey, E: StateKey> Workflow<S, E> {
    pub fn builder(
        name: impl Into<String>,
        stages: impl IntoIterator<Item = S>,
        initial_stage: S,
        end_stages: impl IntoIterator<Item = S>,
    ) -> WorkflowBuilder<S, E> {
        WorkflowBuilder {
            machine: StateMachine::new(stages, initial_stage, end_stages),
            name: name.into(),
            event_chain: Vec::new(),
            actions: HashMap::new(),
            prompts: HashMap::new(),
            observe_fns: HashMap::new(),
            completion_configs: HashMap::new(),
            labels: HashMap::new(),
            end_workflow_tool: None,
            configure_error: None,
        }
    }

    pub fn id(&self) -> &str {
        self.machine.id()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_stage(&self) -> S {
        self.machine.current_state()
    }

    pub fn is_finished(&self) -> bool {
        self.machine.is_end_state(self.machine.current_state())
    }

    pub fn event_chain(&self) -> &[E] {
        &self.event_chain
    }

    /// Prompt template of the current stage.
    pub fn prompt(&self) -> Option<&str> {
        self.prompts.get(&self.machine.current_state()).map(String::as_str)
    }

    /// Observation projection of the current stage.
    pub fn observe_fn(&self) -> Option<&ObserveFn> {
        self.observe_fns.get(&self.machine.current_state())
    }

    /// Completion configuration of the current stage.
    pub fn completion_config(&self) -> CompletionConfig {
        self.completion_configs
            .get(&self.machine.current_state())
            .cloned()
            .unwrap_or_default()
    }

    /// Routing hints consumed by hooks and actions.
    pub fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    pub fn end_workflow_tool(&self) -> Option<&str> {
        self.end_workflow_tool.as_deref()
    }

    pub fn visit_count(&self, stage: S) -> u32 {
        self.machine.visit_count(stage)
    }

    /// Back to the initial stage with a fresh revisit budget.
    pub fn reset(&mut self) {
        self.machine.reset();
    }

    /// Self-drive to a terminal stage and return it.
    pub async fn run(
        &mut self,
        agent: &dyn AgentOps,
        ctx: &RunContext,
        queue: &Queue<Message>,
        task: &mut Task,
    ) -> Result<S, AgentError> {
        loop {
            let stage = self.machine.current_state();
            if self.machine.is_end_state(stage) {
                return Ok(stage);
            }
            let action = match self.actions.get(&stage) {
                Some(action) => Arc::clone(action),
                // Compilation requires an action per non-terminal stage.
                None => {
                    return Err(AgentError::Internal(format!(
                        "stage {stage:?} has no action"
                    )))
                }
            };
            tracing::debug!(workflow = %self.name, stage = ?stage, "running stage action");
            let event = action
                .run(StageContext {
                    agent,
                    workflow: self,
                    ctx,
                    queue,
                    task: &mut *task,
                })
                .await?;
            self.machine.handle_event(event).await.map_err(AgentError::Machine)?;
        }
    }

    pub async fn handle_event(&mut self, event: E) -> Result<S, MachineError> {
        self.machine.handle_event(event).await
    }
}

/// Configures and compiles a [`Workflow`].
pub struct WorkflowBuilder<S: StateKey, E: StateKey> {
    machine: StateMachine<S, E>,
    name: String,
    event_chain: Vec<E>,
    actions: HashMap<S, Arc<dyn StageAction<S, E>>>,
    prompts: HashMap<S, String>,
    observe_fns: HashMap<S, ObserveFn>,
    completion_configs: HashMap<S, CompletionConfig>,
    labels: HashMap<String, String>,
    end_workflow_tool: Option<String>,
    configure_error: Option<CompileError>,
}

impl<S: StateKey, E: StateKey> WorkflowBuilder<S, E> {
    pub fn transition(mut self, from: S, event: E, to: S) -> Self {
        if let Err(error) = self.machine.set_transition(from, event, to, None) {
            self.configure_error.get_or_insert(error);
        }
        self
    }

    pub fn transition_with_action(
        mut self,
        from: S,
        event: E,
        to: S,
        action: TransitionAction<S>,
    ) -> Self {
        if let Err(error) = self.machine.set_transition(from, event, to, Some(action)) {
            self.configure_error.get_or_insert(error);
        }
        self
    }

    pub fn event_chain(mut self, events: impl IntoIterator<Item = E>) -> Self {
        self.event_chain = events.into_iter().collect();
        self
    }

    pub fn action(mut self, stage: S, action: Arc<dyn StageAction<S, E>>) -> Self {
        self.actions.insert(stage, action);
        self
    }

    pub fn prompt(mut self, stage: S, prompt: impl Into<String>) -> Self {
        self.prompts.insert(stage, prompt.into());
        self
    }

    pub fn observe_fn(mut self, stage: S, observe_fn: ObserveFn) -> Self {
        self.observe_fns.insert(stage, observe_fn);
        self
    }

    pub fn completion_config(mut self, stage: S, config: CompletionConfig) -> Self {
        self.completion_configs.insert(stage, config);
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn end_workflow_tool(mut self, name: impl Into<String>) -> Self {
        self.end_workflow_tool = Some(name.into());
        self
    }

    /// Compile the underlying machine, prove the event chain terminates and
    /// require an action for every non-terminal stage.
    pub fn compile(mut self, max_revisit: u32) -> Result<Workflow<S, E>, CompileError> {
        if let Some(error) = self.configure_error {
            return Err(error);
        }
        self.machine.compile(max_revisit)?;

        if self.event_chain.is_empty() {
            return Err(CompileError::NoTransitions);
        }
        let last = self.machine.simulate_chain(&self.event_chain)?;
        if !self.machine.is_end_state(last) {
            return Err(CompileError::ChainDoesNotTerminate(format!("{last:?}")));
        }
        for stage in self.machine.valid_states() {
            if !self.machine.is_end_state(*stage) && !self.actions.contains_key(stage) {
                return Err(CompileError::MissingAction(format!("{stage:?}")));
            }
        }

        Ok(Workflow {
            machine: self.machine,
            name: self.name,
            event_chain: self.event_chain,
            actions: self.actions,
            prompts: self.prompts,
            observe_fns: self.observe_fns,
            completion_configs: self.completion_configs,
            labels: self.labels,
            end_workflow_tool: self.end_workflow_tool,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Stage {
        Work,
        Done,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Event {
        Step,
        Finish,
    }

    struct NullAgent;

    #[async_trait]
    impl AgentOps for NullAgent {
        async fn observe(
            &self,
            _ctx: &RunContext,
            _queue: &Queue<Message>,
            task: &mut Task,
            _observe_fn: Option<&ObserveFn>,
        ) -> Result<Vec<Message>, AgentError> {
            Ok(task.context(crate::task::TaskState::Running).snapshot())
        }

        async fn think(
            &self,
            _ctx: &RunContext,
            _queue: &Queue<Message>,
            _llm_name: &str,
            _observed: &mut Vec<Message>,
            _config: &CompletionConfig,
        ) -> Result<Message, AgentError> {
            Ok(Message::assistant("ok"))
        }

        async fn act(
            &self,
            _ctx: &RunContext,
            _queue: &Queue<Message>,
            tool_call: &ToolCallRequest,
            _task: &mut Task,
            _end_tool: Option<&str>,
        ) -> Result<Message, AgentError> {
            Ok(Message::tool(tool_call.id.clone(), "done", false))
        }

        async fn advertised_tools(&self, _task: &Task) -> Vec<Tool> {
            Vec::new()
        }
    }

    struct CountedAction {
        retries: u32,
    }

    #[async_trait]
    impl StageAction<Stage, Event> for CountedAction {
        async fn run(&self, cx: StageContext<'_, Stage, Event>) -> Result<Event, AgentError> {
            cx.task.append_context(Message::user("step"));
            if cx.workflow.visit_count(Stage::Work) <= self.retries {
                Ok(Event::Step)
            } else {
                Ok(Event::Finish)
            }
        }
    }

    fn builder(retries: u32) -> WorkflowBuilder<Stage, Event> {
        Workflow::builder("test", [Stage::Work, Stage::Done], Stage::Work, [Stage::Done])
            .transition(Stage::Work, Event::Step, Stage::Work)
            .transition(Stage::Work, Event::Finish, Stage::Done)
            .event_chain([Event::Step, Event::Finish])
            .action(Stage::Work, Arc::new(CountedAction { retries }))
    }

    #[test]
    fn test_compile_rejects_chain_that_stops_short() {
        let result = builder(0).event_chain([Event::Step]).compile(2);
        assert!(matches!(result, Err(CompileError::ChainDoesNotTerminate(_))));
    }

    #[test]
    fn test_compile_rejects_missing_action() {
        let result = Workflow::<Stage, Event>::builder(
            "test",
            [Stage::Work, Stage::Done],
            Stage::Work,
            [Stage::Done],
        )
        .transition(Stage::Work, Event::Finish, Stage::Done)
        .event_chain([Event::Finish])
        .compile(0);
        assert!(matches!(result, Err(CompileError::MissingAction(_))));
    }

    #[tokio::test]
    async fn test_run_drives_to_terminal_stage() {
        let mut workflow = builder(1).compile(2).expect("compile");
        let mut task = Task::new("qa", "");
        task.handle_event(crate::task::TaskEvent::Planned).await.expect("plan");
        let queue = Queue::default();
        let ctx = RunContext::default();

        let last = workflow
            .run(&NullAgent, &ctx, &queue, &mut task)
            .await
            .expect("run");
        assert_eq!(last, Stage::Done);
        // One revisit of Work plus the final pass.
        assert_eq!(task.context(crate::task::TaskState::Running).len(), 2);
        assert_eq!(
            task.context(crate::task::TaskState::Running).last().map(|m| m.role),
            Some(Role::User)
        );
    }

    #[tokio::test]
    async fn test_run_stops_when_stage_budget_is_exhausted() {
        let mut workflow = builder(10).compile(1).expect("compile");
        let mut task = Task::new("qa", "");
        task.handle_event(crate::task::TaskEvent::Planned).await.expect("plan");
        let queue = Queue::default();
        let ctx = RunContext::default();

        let result = workflow.run(&NullAgent, &ctx, &queue, &mut task).await;
        assert!(matches!(
            result,
            Err(AgentError::Machine(MachineError::CycleLimitExceeded { .. }))
        ));
    }

    #[tokio::test]
    async fn test_reset_rearms_the_workflow() {
        let mut workflow = builder(1).compile(2).expect("compile");
        let mut task = Task::new("qa", "");
        task.handle_event(crate::task::TaskEvent::Planned).await.expect("plan");
        let queue = Queue::default();
        let ctx = RunContext::default();

        workflow.run(&NullAgent, &ctx, &queue, &mut task).await.expect("first run");
        assert!(workflow.is_finished());
        workflow.reset();
        assert!(!workflow.is_finished());
        workflow.run(&NullAgent, &ctx, &queue, &mut task).await.expect("second run");
    }
}
