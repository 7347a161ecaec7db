//! Scheduler assembly
//!
//! Wires the built-in tree handlers into a compiled scheduler. There is one
//! machine: passing no orchestrator yields the degenerate flat case where a
//! Created task is planned as-is and executed as a leaf.

use std::sync::Arc;

use taskloom_core::task::TaskState;
use taskloom_agent::agent::TaskAgent;

use crate::handlers::{
    CreatedHandler, RunningCanceledCallback, RunningFinishedCallback, RunningHandler,
    RunningReplanCallback, RunningRetryCallback,
};
use crate::registry::TaskRegistry;
use crate::scheduler::{Scheduler, SchedulerError};

/// Build the default tree scheduler.
///
/// `max_error_retry` bounds both the Running retry loop and the number of
/// re-planning rounds a parent gets after sub-task cancellations.
pub fn build_tree_scheduler(
    executor: Arc<dyn TaskAgent>,
    orchestrator: Option<Arc<dyn TaskAgent>>,
    registry: Arc<TaskRegistry>,
    max_error_retry: u32,
) -> Result<Scheduler, SchedulerError> {
    let mut scheduler = Scheduler::new(max_error_retry);
    scheduler.set_on_state_fn(
        TaskState::Created,
        Arc::new(CreatedHandler::new(orchestrator, registry)),
    )?;
    scheduler.set_on_state_fn(TaskState::Running, Arc::new(RunningHandler::new(executor)))?;

    scheduler.set_on_state_changed_fn(
        (TaskState::Running, TaskState::Finished),
        Arc::new(RunningFinishedCallback),
    )?;
    scheduler.set_on_state_changed_fn(
        (TaskState::Running, TaskState::Running),
        Arc::new(RunningRetryCallback),
    )?;
    scheduler.set_on_state_changed_fn(
        (TaskState::Running, TaskState::Created),
        Arc::new(RunningReplanCallback),
    )?;
    scheduler.set_on_state_changed_fn(
        (TaskState::Running, TaskState::Canceled),
        Arc::new(RunningCanceledCallback),
    )?;

    scheduler.compile()?;
    Ok(scheduler)
}
