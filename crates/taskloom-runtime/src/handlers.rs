//! Built-in tree handlers and transition callbacks
//!
//! The default scheduling behavior for task trees:
//! - Created: optionally orchestrate sub-tasks, then plan
//! - Running: drive children sequentially, or execute the leaf
//! - transition callbacks propagate cancellation, record retry feedback and
//!   re-plan a parent whose sub-task was canceled
//!
//! Cancellation of a still-Created descendant passes through Planned first:
//! the fixed task transition table has no Created → Canceled edge.

use std::sync::Arc;

use async_trait::async_trait;

use taskloom_core::context::RunContext;
use taskloom_core::message::{Message, Role};
use taskloom_core::queue::Queue;
use taskloom_core::task::{views, TaskEvent, TaskId, TaskState, TaskTree};
use taskloom_agent::agent::TaskAgent;
use taskloom_agent::orchestrate::parse_sub_task_specs;

use crate::registry::TaskRegistry;
use crate::scheduler::{OnState, OnStateChanged, Scheduler, SchedulerError};

async fn notify(queue: &Queue<Message>, text: String, is_error: bool) {
    if queue.put(Message::system(text).with_error(is_error)).await.is_err() {
        tracing::warn!("out queue closed, dropping notification");
    }
}

/// Apply Cancel to one non-terminal node.
async fn cancel_node(tree: &mut TaskTree, id: TaskId) -> Result<(), SchedulerError> {
    let task = tree.task_mut(id);
    match task.state() {
        TaskState::Created => {
            task.handle_event(TaskEvent::Planned).await?;
            task.handle_event(TaskEvent::Cancel).await?;
        }
        TaskState::Running => {
            task.handle_event(TaskEvent::Cancel).await?;
        }
        TaskState::Finished | TaskState::Canceled => {}
    }
    Ok(())
}

/// Cancel every non-terminal descendant, depth-first.
async fn cancel_descendants(tree: &mut TaskTree, id: TaskId) -> Result<(), SchedulerError> {
    for node in tree.descendants(id) {
        cancel_node(tree, node).await?;
    }
    Ok(())
}

/// Created: run the orchestrator (when configured) and materialize its plan
/// into children, then hand the task over to execution.
pub struct CreatedHandler {
    orchestrator: Option<Arc<dyn TaskAgent>>,
    registry: Arc<TaskRegistry>,
}

impl CreatedHandler {
    pub fn new(orchestrator: Option<Arc<dyn TaskAgent>>, registry: Arc<TaskRegistry>) -> Self {
        Self {
            orchestrator,
            registry,
        }
    }
}

#[async_trait]
impl OnState for CreatedHandler {
    async fn call(
        &self,
        _scheduler: &Scheduler,
        ctx: &RunContext,
        queue: &Queue<Message>,
        tree: &mut TaskTree,
        id: TaskId,
    ) -> Result<Option<TaskEvent>, SchedulerError> {
        // Types the registry executes directly are leaves; only composite
        // types are decomposed.
        let is_leaf_type = self.registry.contains(tree.task(id).task_type());
        if let (Some(orchestrator), false) = (&self.orchestrator, is_leaf_type) {
            orchestrator.run_task(ctx, queue, tree.task_mut(id)).await?;

            // The planner leaves its validated JSON as the last clean
            // assistant message of the Created context.
            let plan = tree
                .task(id)
                .context(TaskState::Created)
                .snapshot()
                .iter()
                .rev()
                .find(|m| m.role == Role::Assistant && !m.is_error)
                .map(|m| m.text());

            match plan.as_deref().map(parse_sub_task_specs) {
                Some(Ok(specs)) => {
                    for spec in &specs {
                        let child = self.registry.build_from_spec(spec)?;
                        tree.add_sub_task(id, child)?;
                    }
                    tree.task_mut(id).clean_error();
                    notify(
                        queue,
                        format!(
                            "task `{}` planned {} sub-task(s)",
                            tree.task(id).title(),
                            specs.len()
                        ),
                        false,
                    )
                    .await;
                }
                Some(Err(reason)) => tree.task_mut(id).set_error(reason),
                None => tree.task_mut(id).set_error("the orchestrator produced no plan"),
            }
        }
        Ok(Some(TaskEvent::Planned))
    }
}

/// Running: drive children in insertion order, or execute the leaf through
/// the executor agent.
pub struct RunningHandler {
    executor: Arc<dyn TaskAgent>,
}

impl RunningHandler {
    pub fn new(executor: Arc<dyn TaskAgent>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl OnState for RunningHandler {
    async fn call(
        &self,
        scheduler: &Scheduler,
        ctx: &RunContext,
        queue: &Queue<Message>,
        tree: &mut TaskTree,
        id: TaskId,
    ) -> Result<Option<TaskEvent>, SchedulerError> {
        let children = tree.children(id).to_vec();

        if children.is_empty() {
            let task = tree.task_mut(id);
            return match self.executor.run_task(ctx, queue, task).await {
                Ok(()) => {
                    if task.is_error() {
                        // Recoverable failure: retry through Running → Running
                        // until the revisit budget runs out.
                        Ok(Some(TaskEvent::Planned))
                    } else {
                        Ok(Some(TaskEvent::Done))
                    }
                }
                Err(error) => {
                    tracing::error!(task = %id, %error, "executor aborted the attempt");
                    task.set_error(error.to_string());
                    Ok(Some(TaskEvent::Cancel))
                }
            };
        }

        // A sibling starts only after its predecessor reached a terminal
        // state.
        for child in &children {
            if !tree.task(*child).is_terminal() {
                scheduler.schedule(ctx, queue, tree, *child).await?;
            }
        }

        let any_canceled = children
            .iter()
            .any(|child| tree.task(*child).state() == TaskState::Canceled);
        if any_canceled {
            if tree.task(id).visit_count(TaskState::Created) > scheduler.max_error_retry() {
                tree.task_mut(id)
                    .set_error("re-plan budget exhausted after sub-task cancellation");
                return Ok(Some(TaskEvent::Cancel));
            }
            tree.task_mut(id).set_error("a sub-task was canceled");
            return Ok(Some(TaskEvent::Init));
        }

        let output = views::document_tree_view(tree, id, 1);
        tree.task_mut(id).set_completed(output);
        Ok(Some(TaskEvent::Done))
    }
}

/// (Running, Finished): clear error, detach children, notify.
pub struct RunningFinishedCallback;

#[async_trait]
impl OnStateChanged for RunningFinishedCallback {
    async fn call(
        &self,
        _scheduler: &Scheduler,
        _ctx: &RunContext,
        queue: &Queue<Message>,
        tree: &mut TaskTree,
        id: TaskId,
    ) -> Result<(), SchedulerError> {
        tree.task_mut(id).clean_error();
        for child in tree.children(id).to_vec() {
            tree.remove_parent(child);
        }
        notify(queue, format!("task `{}` finished", tree.task(id).title()), false).await;
        Ok(())
    }
}

/// (Running, Running): feed the failure back into the running context and
/// start the next attempt clean.
pub struct RunningRetryCallback;

#[async_trait]
impl OnStateChanged for RunningRetryCallback {
    async fn call(
        &self,
        _scheduler: &Scheduler,
        _ctx: &RunContext,
        queue: &Queue<Message>,
        tree: &mut TaskTree,
        id: TaskId,
    ) -> Result<(), SchedulerError> {
        let task = tree.task_mut(id);
        let error = task.error_info().unwrap_or("unknown error").to_string();
        let feedback = Message::system(format!("the previous attempt failed: {error}"));
        task.append_context(feedback.clone());
        task.clean_error();
        if queue.put(feedback).await.is_err() {
            tracing::warn!("out queue closed, dropping retry notification");
        }
        Ok(())
    }
}

/// (Running, Created): a sub-task was canceled; cancel the rest, clear the
/// children and leave the cancellation report for the next planning pass.
pub struct RunningReplanCallback;

#[async_trait]
impl OnStateChanged for RunningReplanCallback {
    async fn call(
        &self,
        _scheduler: &Scheduler,
        _ctx: &RunContext,
        queue: &Queue<Message>,
        tree: &mut TaskTree,
        id: TaskId,
    ) -> Result<(), SchedulerError> {
        let children = tree.children(id).to_vec();
        let mut reports = Vec::new();
        for child in &children {
            let task = tree.task(*child);
            if task.state() == TaskState::Canceled {
                reports.push(format!(
                    "sub-task `{}` was canceled: {}",
                    task.title(),
                    task.error_info().unwrap_or("no error recorded"),
                ));
            }
        }
        for child in &children {
            if tree.task(*child).state() != TaskState::Finished {
                cancel_node(tree, *child).await?;
                cancel_descendants(tree, *child).await?;
            }
        }
        tree.clear_children(id);

        let task = tree.task_mut(id);
        task.clear_contexts();
        for report in reports {
            task.append_context(Message::system(report));
        }
        task.clean_error();
        notify(
            queue,
            format!("task `{}` is re-planning after a sub-task cancellation", tree.task(id).title()),
            true,
        )
        .await;
        Ok(())
    }
}

/// (Running, Canceled): propagate cancellation through the subtree, notify.
pub struct RunningCanceledCallback;

#[async_trait]
impl OnStateChanged for RunningCanceledCallback {
    async fn call(
        &self,
        _scheduler: &Scheduler,
        _ctx: &RunContext,
        queue: &Queue<Message>,
        tree: &mut TaskTree,
        id: TaskId,
    ) -> Result<(), SchedulerError> {
        cancel_descendants(tree, id).await?;
        let task = tree.task(id);
        notify(
            queue,
            format!(
                "task `{}` was canceled: {}",
                task.title(),
                task.error_info().unwrap_or("no error recorded"),
            ),
            true,
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskloom_core::task::Task;

    #[tokio::test]
    async fn test_cancel_node_routes_created_through_planned() {
        let mut tree = TaskTree::new();
        let id = tree.insert(Task::new("qa", ""));
        cancel_node(&mut tree, id).await.expect("cancel");
        assert_eq!(tree.task(id).state(), TaskState::Canceled);
    }

    #[tokio::test]
    async fn test_cancel_descendants_skips_terminal_nodes() {
        let mut tree = TaskTree::new();
        let root = tree.insert(Task::new("qa", ""));
        let done = tree.add_sub_task(root, Task::new("qa", "")).expect("child");
        let open = tree.add_sub_task(root, Task::new("qa", "")).expect("child");
        let task = tree.task_mut(done);
        task.handle_event(TaskEvent::Planned).await.expect("plan");
        task.handle_event(TaskEvent::Done).await.expect("done");

        cancel_descendants(&mut tree, root).await.expect("cancel");
        assert_eq!(tree.task(done).state(), TaskState::Finished);
        assert_eq!(tree.task(open).state(), TaskState::Canceled);
    }
}
