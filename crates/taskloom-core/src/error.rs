//! Error types shared across the core
//!
//! Two channels are kept apart on purpose:
//! - structural errors (this module) propagate with `?` and abort the caller
//! - transient failures travel as `Message { is_error: true }` values and are
//!   handled by retry logic in the drive loops

use thiserror::Error;

/// Validation failures raised while compiling a state machine or workflow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("state machine has already been compiled")]
    AlreadyCompiled,

    #[error("no valid states configured")]
    NoStates,

    #[error("no transitions configured")]
    NoTransitions,

    #[error("no end states configured")]
    NoEndStates,

    #[error("state outside the valid set: {0}")]
    InvalidState(String),

    #[error("states unreachable from the initial state: {0:?}")]
    Unreachable(Vec<String>),

    #[error("states with no forward path to an end state: {0:?}")]
    NoPathToEnd(Vec<String>),

    #[error("event chain has no transition for ({state}, {event})")]
    ChainBroken { state: String, event: String },

    #[error("event chain stops at non-terminal stage {0}")]
    ChainDoesNotTerminate(String),

    #[error("stage {0} has no action")]
    MissingAction(String),
}

/// Runtime failures of a compiled state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MachineError {
    #[error("no transition from state {state} on event {event}")]
    NoTransition { state: String, event: String },

    #[error("revisit budget exhausted for state {state}")]
    CycleLimitExceeded { state: String },

    #[error("state machine is not compiled")]
    NotCompiled,
}

/// Task tree invariant violations, raised when attaching nodes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("depth {depth} exceeds the maximum depth {max_depth}")]
    DepthLimitExceeded { depth: u32, max_depth: u32 },

    #[error("attaching the node would create a cycle in the tree")]
    CycleInTree,
}

/// Failures surfaced by agent primitives through the `AgentOps` seam.
///
/// Tool failures and human interference never appear here; they come back as
/// error-flagged messages so the workflow can decide to retry.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("no llm registered under the name {0}")]
    UnknownLlm(String),

    #[error("llm failure: {0}")]
    Llm(String),

    #[error(transparent)]
    Machine(#[from] MachineError),

    #[error("internal agent error: {0}")]
    Internal(String),
}
