//! Hook chains around the agent primitives
//!
//! Every extension point is an ordered list of named callbacks. A callback
//! reports [`HookOutcome::Interfere`] to request out-of-band attention; the
//! primitive turns that into an error-flagged message instead of letting an
//! error escape, so the workflow can decide to re-think.
//!
//! Chains that transform observations mutate their argument in place;
//! think/act results travel by return value.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use taskloom_core::context::RunContext;
use taskloom_core::message::{Message, ToolCallRequest};
use taskloom_core::queue::Queue;
use taskloom_core::task::Task;

/// Result of one hook callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Continue,
    /// Request out-of-band (typically human) attention with a reason.
    Interfere(String),
}

/// Base trait giving every hook a removable identity.
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;
}

/// pre_run_once / post_run_once / pre_observe: full task access.
#[async_trait]
pub trait TaskHook: Hook {
    async fn call(&self, ctx: &RunContext, queue: &Queue<Message>, task: &mut Task)
        -> HookOutcome;
}

/// post_observe: transform the observed messages in place.
#[async_trait]
pub trait ObserveHook: Hook {
    async fn call(
        &self,
        ctx: &RunContext,
        queue: &Queue<Message>,
        task: &Task,
        observed: &mut Vec<Message>,
    ) -> HookOutcome;
}

/// pre_think: mask or reshape the prompt before it reaches the LLM.
#[async_trait]
pub trait PreThinkHook: Hook {
    async fn call(
        &self,
        ctx: &RunContext,
        queue: &Queue<Message>,
        observed: &mut Vec<Message>,
    ) -> HookOutcome;
}

/// post_think: restore masks or annotate the reply.
#[async_trait]
pub trait PostThinkHook: Hook {
    async fn call(
        &self,
        ctx: &RunContext,
        queue: &Queue<Message>,
        observed: &[Message],
        reply: &mut Message,
    ) -> HookOutcome;
}

/// pre_act: permission and rate-limit checks before a tool call.
#[async_trait]
pub trait ActHook: Hook {
    async fn call(
        &self,
        ctx: &RunContext,
        queue: &Queue<Message>,
        task: &Task,
        tool_call: &ToolCallRequest,
    ) -> HookOutcome;
}

/// post_act: audit or watermark the tool result.
#[async_trait]
pub trait ToolResultHook: Hook {
    async fn call(
        &self,
        ctx: &RunContext,
        queue: &Queue<Message>,
        task: &Task,
        result: &mut Message,
    ) -> HookOutcome;
}

/// Ordered list of hooks, executed in registration order.
pub struct HookChain<H: Hook + ?Sized> {
    hooks: Vec<Arc<H>>,
}

impl<H: Hook + ?Sized> HookChain<H> {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn add(&mut self, hook: Arc<H>) {
        self.hooks.push(hook);
    }

    /// Remove the first hook registered under `name`. A hook registered
    /// twice loses exactly one instance.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.hooks.iter().position(|h| h.name() == name) {
            Some(position) => {
                self.hooks.remove(position);
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<H>> {
        self.hooks.iter()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl<H: Hook + ?Sized> Default for HookChain<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// pre_think hook that interferes once a step limit is reached, bounding
/// how many completions a single drive loop may issue.
pub struct StepCounterHook {
    limit: u32,
    steps: AtomicU32,
}

impl StepCounterHook {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            steps: AtomicU32::new(0),
        }
    }

    pub fn steps(&self) -> u32 {
        self.steps.load(Ordering::Relaxed)
    }
}

impl Hook for StepCounterHook {
    fn name(&self) -> &str {
        "step_counter"
    }
}

#[async_trait]
impl PreThinkHook for StepCounterHook {
    async fn call(
        &self,
        _ctx: &RunContext,
        _queue: &Queue<Message>,
        _observed: &mut Vec<Message>,
    ) -> HookOutcome {
        let taken = self.steps.fetch_add(1, Ordering::Relaxed) + 1;
        if taken > self.limit {
            HookOutcome::Interfere(format!(
                "step limit of {} reached after {} completions",
                self.limit, taken
            ))
        } else {
            HookOutcome::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        label: &'static str,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Hook for Recording {
        fn name(&self) -> &str {
            self.label
        }
    }

    #[async_trait]
    impl TaskHook for Recording {
        async fn call(
            &self,
            _ctx: &RunContext,
            _queue: &Queue<Message>,
            _task: &mut Task,
        ) -> HookOutcome {
            self.calls.lock().expect("lock").push(self.label);
            HookOutcome::Continue
        }
    }

    fn chain_with(labels: &[&'static str], calls: &Arc<Mutex<Vec<&'static str>>>) -> HookChain<dyn TaskHook> {
        let mut chain: HookChain<dyn TaskHook> = HookChain::new();
        for label in labels {
            chain.add(Arc::new(Recording {
                label,
                calls: calls.clone(),
            }));
        }
        chain
    }

    #[tokio::test]
    async fn test_chain_runs_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let chain = chain_with(&["first", "second", "third"], &calls);
        let ctx = RunContext::default();
        let queue = Queue::default();
        let mut task = Task::new("qa", "");
        for hook in chain.iter() {
            hook.call(&ctx, &queue, &mut task).await;
        }
        assert_eq!(*calls.lock().expect("lock"), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_remove_takes_exactly_one_instance() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut chain = chain_with(&["dup", "other", "dup"], &calls);
        assert_eq!(chain.len(), 3);
        assert!(chain.remove("dup"));
        assert_eq!(chain.len(), 2);
        // The second registration survives.
        assert!(chain.iter().any(|h| h.name() == "dup"));
        assert!(chain.remove("dup"));
        assert!(!chain.remove("dup"));
    }

    #[tokio::test]
    async fn test_step_counter_interferes_past_the_limit() {
        let hook = StepCounterHook::new(2);
        let ctx = RunContext::default();
        let queue = Queue::default();
        let mut observed = Vec::new();
        assert_eq!(hook.call(&ctx, &queue, &mut observed).await, HookOutcome::Continue);
        assert_eq!(hook.call(&ctx, &queue, &mut observed).await, HookOutcome::Continue);
        match hook.call(&ctx, &queue, &mut observed).await {
            HookOutcome::Interfere(reason) => assert!(reason.contains("step limit")),
            other => panic!("expected interference, got {other:?}"),
        }
        assert_eq!(hook.steps(), 3);
    }
}
