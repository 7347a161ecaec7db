//! # Taskloom Agent
//!
//! Agent-side building blocks for the taskloom runtime:
//! - [`agent::Agent`]: observe / think / act primitives wrapped in ordered
//!   hook chains, hosting one workflow per agent
//! - [`hooks`]: the eight hook registration points and their outcome model
//! - [`llm`]: the LLM adapter interface, block delimiters and a scripted
//!   mock for tests
//! - [`tool`]: the tool service interface with tag-based advertisement
//! - [`react`] / [`reflect`] / [`orchestrate`]: the built-in executor,
//!   draft-and-critique and planner workflows

pub mod agent;
pub mod hooks;
pub mod llm;
pub mod orchestrate;
pub mod react;
pub mod reflect;
pub mod tool;

pub use agent::{Agent, AgentHooks, TaskAgent, DEFAULT_LLM, HUMAN_INTERFERE_FLAG};
pub use hooks::{
    ActHook, Hook, HookChain, HookOutcome, ObserveHook, PostThinkHook, PreThinkHook,
    StepCounterHook, TaskHook, ToolResultHook,
};
pub use llm::{LlmClient, LlmError, MockLlm};
pub use orchestrate::{
    orchestrate_workflow, parse_sub_task_specs, OrchestrateEvent, OrchestrateStage, SubTaskSpec,
};
pub use react::{end_workflow_tool, react_workflow, ReactEvent, ReactStage, END_WORKFLOW_TOOL};
pub use reflect::{reflect_workflow, ReflectEvent, ReflectStage};
pub use tool::{tools_for_task, StaticToolService, ToolService};
