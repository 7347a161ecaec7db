//! Task lifecycle machine
//!
//! A task is a state machine specialized to the fixed lifecycle
//! Created → Running → Finished/Canceled, carrying input/output, tags, a
//! textual protocol and one conversation buffer per state so that
//! state-specific prompts do not pollute one another.
//!
//! Events are applied from the outside (by the scheduler drive loop); the
//! task itself never advances its own state.

mod tree;
pub mod views;

pub use tree::{TaskId, TaskTree};

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::completion::CompletionConfig;
use crate::error::MachineError;
use crate::message::Message;
use crate::state_machine::StateMachine;

/// Fixed task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Running,
    Finished,
    Canceled,
}

/// Fixed task lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEvent {
    Init,
    Planned,
    Done,
    Cancel,
}

/// The full task state set.
pub fn task_states() -> [TaskState; 4] {
    [
        TaskState::Created,
        TaskState::Running,
        TaskState::Finished,
        TaskState::Canceled,
    ]
}

/// Terminal task states.
pub fn task_end_states() -> [TaskState; 2] {
    [TaskState::Finished, TaskState::Canceled]
}

/// The fixed transition table:
/// - Created  + Planned → Running
/// - Running  + Done    → Finished
/// - Running  + Planned → Running   (error retry, consumes revisit budget)
/// - Running  + Init    → Created   (reset after a sub-task cancellation)
/// - Running  + Cancel  → Canceled
pub fn task_transitions() -> Vec<(TaskState, TaskEvent, TaskState)> {
    vec![
        (TaskState::Created, TaskEvent::Planned, TaskState::Running),
        (TaskState::Running, TaskEvent::Done, TaskState::Finished),
        (TaskState::Running, TaskEvent::Planned, TaskState::Running),
        (TaskState::Running, TaskEvent::Init, TaskState::Created),
        (TaskState::Running, TaskEvent::Cancel, TaskState::Canceled),
    ]
}

/// Ordered conversation history for one task state.
#[derive(Debug, Clone, Default)]
pub struct ContextBuffer {
    messages: Vec<Message>,
}

impl ContextBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// A unit of work with a status lifecycle, typed input/output and per-state
/// conversation context.
pub struct Task {
    machine: StateMachine<TaskState, TaskEvent>,
    title: String,
    task_type: String,
    tags: HashSet<String>,
    protocol: String,
    template: Option<String>,
    input: String,
    output: Option<String>,
    completed: bool,
    error_info: Option<String>,
    max_depth: u32,
    completion_config: CompletionConfig,
    contexts: HashMap<TaskState, ContextBuffer>,
}

impl Task {
    pub const DEFAULT_MAX_DEPTH: u32 = 5;

    /// Build a task with the fixed lifecycle, compiled with a zero revisit
    /// budget. The scheduler re-arms the budget when it starts driving.
    pub fn new(task_type: impl Into<String>, protocol: impl Into<String>) -> Self {
        let mut machine = StateMachine::new(task_states(), TaskState::Created, task_end_states());
        for (from, event, to) in task_transitions() {
            machine
                .set_transition(from, event, to, None)
                .expect("fixed transition table registers before compile");
        }
        machine
            .compile(0)
            .expect("fixed transition table always compiles");

        let contexts = task_states()
            .into_iter()
            .map(|state| (state, ContextBuffer::new()))
            .collect();

        Self {
            machine,
            title: String::new(),
            task_type: task_type.into(),
            tags: HashSet::new(),
            protocol: protocol.into(),
            template: None,
            input: String::new(),
            output: None,
            completed: false,
            error_info: None,
            max_depth: Self::DEFAULT_MAX_DEPTH,
            completion_config: CompletionConfig::default(),
            contexts,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = input.into();
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_completion_config(mut self, config: CompletionConfig) -> Self {
        self.completion_config = config;
        self
    }

    // ---- lifecycle ----

    pub fn id(&self) -> &str {
        self.machine.id()
    }

    pub fn state(&self) -> TaskState {
        self.machine.current_state()
    }

    pub fn is_terminal(&self) -> bool {
        self.machine.is_end_state(self.state())
    }

    /// Apply one lifecycle event. Structural failures (no edge, exhausted
    /// revisit budget) propagate to the caller.
    pub async fn handle_event(&mut self, event: TaskEvent) -> Result<TaskState, MachineError> {
        self.machine.handle_event(event).await
    }

    pub fn visit_count(&self, state: TaskState) -> u32 {
        self.machine.visit_count(state)
    }

    pub fn set_revisit_budget(&mut self, max_revisit: u32) {
        self.machine.set_revisit_budget(max_revisit);
    }

    /// Back to Created with fresh visit counts and empty context buffers.
    pub fn reset(&mut self) {
        self.machine.reset();
        self.clear_contexts();
        self.completed = false;
        self.output = None;
    }

    /// Drop all per-state conversation buffers, keeping visit counts.
    pub fn clear_contexts(&mut self) {
        for buffer in self.contexts.values_mut() {
            buffer.clear();
        }
    }

    // ---- attributes ----

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn tags(&self) -> &HashSet<String> {
        &self.tags
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn completion_config(&self) -> &CompletionConfig {
        &self.completion_config
    }

    // ---- input / output ----

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, input: impl Into<String>) {
        self.input = input.into();
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn set_output(&mut self, output: impl Into<String>) {
        self.output = Some(output.into());
    }

    /// Store the output and mark the attempt complete. The Done event is
    /// applied by the drive loop, not here.
    pub fn set_completed(&mut self, output: impl Into<String>) {
        self.output = Some(output.into());
        self.completed = true;
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    // ---- error info ----

    pub fn is_error(&self) -> bool {
        self.error_info.is_some()
    }

    pub fn error_info(&self) -> Option<&str> {
        self.error_info.as_deref()
    }

    pub fn set_error(&mut self, info: impl Into<String>) {
        self.error_info = Some(info.into());
    }

    pub fn clean_error(&mut self) {
        self.error_info = None;
    }

    // ---- per-state context ----

    pub fn context(&self, state: TaskState) -> &ContextBuffer {
        &self.contexts[&state]
    }

    pub fn context_mut(&mut self, state: TaskState) -> &mut ContextBuffer {
        self.contexts.entry(state).or_default()
    }

    /// Append to the buffer of the current state.
    pub fn append_context(&mut self, message: Message) {
        let state = self.state();
        self.context_mut(state).append(message);
    }
}
