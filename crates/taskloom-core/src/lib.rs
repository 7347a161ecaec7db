//! # Taskloom Core
//!
//! Core abstractions and deterministic logic for the taskloom agent
//! orchestration runtime.
//!
//! This crate contains:
//! - The generic compiled [`state_machine::StateMachine`]
//! - [`task::Task`] lifecycle machine and the [`task::TaskTree`] arena
//! - The self-driving [`workflow::Workflow`] and its action/primitive seams
//! - The [`message::Message`] / tool-call data model and completion knobs
//! - The bounded async [`queue::Queue`] feeding external observers
//!
//! This crate does NOT contain:
//! - LLM provider adapters or a tool service implementation
//! - Scheduling policy (see `taskloom-runtime`)
//! - Persistence of any kind

pub mod completion;
pub mod context;
pub mod error;
pub mod message;
pub mod queue;
pub mod state_machine;
pub mod task;
pub mod workflow;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::completion::{CompletionConfig, Tool};
    pub use crate::context::RunContext;
    pub use crate::error::{AgentError, CompileError, MachineError, TreeError};
    pub use crate::message::{
        CompletionUsage, ContentBlock, Message, Role, StopReason, ToolCallRequest,
    };
    pub use crate::queue::{Queue, QueueError};
    pub use crate::state_machine::{StateKey, StateMachine, TransitionAction};
    pub use crate::task::{
        ContextBuffer, Task, TaskEvent, TaskId, TaskState, TaskTree,
    };
    pub use crate::workflow::{
        AgentOps, ObserveFn, StageAction, StageContext, Workflow, WorkflowBuilder,
    };
}

pub use completion::{CompletionConfig, Tool};
pub use context::RunContext;
pub use error::{AgentError, CompileError, MachineError, TreeError};
pub use message::{CompletionUsage, ContentBlock, Message, Role, StopReason, ToolCallRequest};
pub use queue::{Queue, QueueError};
pub use state_machine::{StateKey, StateMachine};
pub use task::{ContextBuffer, Task, TaskEvent, TaskId, TaskState, TaskTree};
pub use workflow::{AgentOps, ObserveFn, StageAction, StageContext, Workflow, WorkflowBuilder};
