//! State-driven task scheduler
//!
//! The scheduler watches a task's state, invokes the handler registered for
//! it and applies the returned event back to the task, then fires the
//! matching state-changed callback. Per task the order is strict:
//! handler → event application → changed callback → next handler. Nothing
//! else can interleave for the same task.
//!
//! The scheduler is itself validated as a state machine over the fixed task
//! transition table, compiled at construction with the error-retry budget.
//! Handler registration is rejected once compiled.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use thiserror::Error;

use taskloom_core::context::RunContext;
use taskloom_core::error::{AgentError, CompileError, MachineError, TreeError};
use taskloom_core::message::Message;
use taskloom_core::queue::Queue;
use taskloom_core::state_machine::StateMachine;
use taskloom_core::task::{
    task_end_states, task_states, task_transitions, TaskEvent, TaskId, TaskState, TaskTree,
};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no handler registered for state {0}")]
    NoHandler(String),

    #[error("scheduler has already been compiled")]
    AlreadyCompiled,

    #[error("scheduler is not compiled")]
    NotCompiled,

    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Machine(#[from] MachineError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// Handler invoked while the task sits in one state. Returning `None` stops
/// the drive loop without applying an event.
#[async_trait]
pub trait OnState: Send + Sync {
    async fn call(
        &self,
        scheduler: &Scheduler,
        ctx: &RunContext,
        queue: &Queue<Message>,
        tree: &mut TaskTree,
        id: TaskId,
    ) -> Result<Option<TaskEvent>, SchedulerError>;
}

/// Callback invoked exactly once after a state transition was applied. It
/// must not drive another transition of the same task.
#[async_trait]
pub trait OnStateChanged: Send + Sync {
    async fn call(
        &self,
        scheduler: &Scheduler,
        ctx: &RunContext,
        queue: &Queue<Message>,
        tree: &mut TaskTree,
        id: TaskId,
    ) -> Result<(), SchedulerError>;
}

pub struct Scheduler {
    machine: StateMachine<TaskState, TaskEvent>,
    end_states: HashSet<TaskState>,
    on_state: HashMap<TaskState, Arc<dyn OnState>>,
    on_state_changed: HashMap<(TaskState, TaskState), Arc<dyn OnStateChanged>>,
    max_error_retry: u32,
    compiled: bool,
}

impl Scheduler {
    pub fn new(max_error_retry: u32) -> Self {
        let mut machine = StateMachine::new(task_states(), TaskState::Created, task_end_states());
        for (from, event, to) in task_transitions() {
            machine
                .set_transition(from, event, to, None)
                .expect("fixed transition table registers before compile");
        }
        Self {
            machine,
            end_states: task_end_states().into_iter().collect(),
            on_state: HashMap::new(),
            on_state_changed: HashMap::new(),
            max_error_retry,
            compiled: false,
        }
    }

    pub fn max_error_retry(&self) -> u32 {
        self.max_error_retry
    }

    pub fn end_states(&self) -> &HashSet<TaskState> {
        &self.end_states
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    pub fn set_on_state_fn(
        &mut self,
        state: TaskState,
        handler: Arc<dyn OnState>,
    ) -> Result<(), SchedulerError> {
        if self.compiled {
            return Err(SchedulerError::AlreadyCompiled);
        }
        self.on_state.insert(state, handler);
        Ok(())
    }

    pub fn set_on_state_changed_fn(
        &mut self,
        transition: (TaskState, TaskState),
        callback: Arc<dyn OnStateChanged>,
    ) -> Result<(), SchedulerError> {
        if self.compiled {
            return Err(SchedulerError::AlreadyCompiled);
        }
        self.on_state_changed.insert(transition, callback);
        Ok(())
    }

    /// Validate the transition graph with the retry budget and require a
    /// handler for every non-terminal state.
    pub fn compile(&mut self) -> Result<(), SchedulerError> {
        if self.compiled {
            return Err(SchedulerError::AlreadyCompiled);
        }
        self.machine.compile(self.max_error_retry)?;
        for state in self.machine.valid_states() {
            if !self.end_states.contains(state) && !self.on_state.contains_key(state) {
                return Err(SchedulerError::NoHandler(format!("{state:?}")));
            }
        }
        self.compiled = true;
        tracing::debug!(max_error_retry = self.max_error_retry, "scheduler compiled");
        Ok(())
    }

    /// Drive one task to a terminal state. Boxed so handlers can recurse
    /// into children.
    pub fn schedule<'a>(
        &'a self,
        ctx: &'a RunContext,
        queue: &'a Queue<Message>,
        tree: &'a mut TaskTree,
        id: TaskId,
    ) -> BoxFuture<'a, Result<(), SchedulerError>> {
        Box::pin(async move {
            if !self.compiled {
                return Err(SchedulerError::NotCompiled);
            }
            tree.task_mut(id).set_revisit_budget(self.max_error_retry);

            loop {
                let state = tree.task(id).state();
                if self.end_states.contains(&state) {
                    return Ok(());
                }
                let handler = self
                    .on_state
                    .get(&state)
                    .cloned()
                    .ok_or_else(|| SchedulerError::NoHandler(format!("{state:?}")))?;
                tracing::info!(task = %id, title = %tree.task(id).title(), state = ?state, "dispatching state handler");

                let event = match handler.call(self, ctx, queue, tree, id).await? {
                    Some(event) => event,
                    None => return Ok(()),
                };

                let old = state;
                let new = tree.task_mut(id).handle_event(event).await?;
                tracing::info!(task = %id, from = ?old, event = ?event, to = ?new, "task state changed");

                if let Some(callback) = self.on_state_changed.get(&(old, new)).cloned() {
                    callback.call(self, ctx, queue, tree, id).await?;
                }
            }
        })
    }

    /// Drive the root to a terminal state, report the outcome as a final
    /// SYSTEM message and close the queue.
    pub async fn run(
        &self,
        ctx: &RunContext,
        queue: &Queue<Message>,
        tree: &mut TaskTree,
        root: TaskId,
    ) -> Result<(), SchedulerError> {
        let result = self.schedule(ctx, queue, tree, root).await;
        let task = tree.task(root);
        let closing = match &result {
            Ok(()) => match task.state() {
                TaskState::Finished => Message::system(format!(
                    "task `{}` finished",
                    task.title()
                )),
                state => Message::system(format!(
                    "task `{}` ended in {state:?}: {}",
                    task.title(),
                    task.error_info().unwrap_or("no error recorded"),
                ))
                .with_error(true),
            },
            Err(error) => Message::system(format!(
                "task `{}` aborted: {error}",
                task.title()
            ))
            .with_error(true),
        };
        if queue.put(closing).await.is_err() {
            tracing::warn!("out queue closed before the final notification");
        }
        queue.close();
        result
    }
}
