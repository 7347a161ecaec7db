//! Generic compiled state machine
//!
//! The machine is built in two phases:
//! - configuration: `set_transition` registers edges into a `(state, event)`
//!   keyed table
//! - `compile`: validates that every valid state is reachable from the
//!   initial state (forward BFS) and that every state keeps a forward path to
//!   some end state (reverse BFS), then arms the per-state revisit budget
//!
//! At runtime `handle_event` resolves the edge for the current state,
//! enforces the revisit budget and fires the optional transition action
//! after the state update, so the action observes the new state.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use uuid::Uuid;

use crate::error::{CompileError, MachineError};

/// Bound required of state and event types.
pub trait StateKey: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> StateKey for T where T: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// Async callback fired after a transition, receiving `(from, to)`.
pub type TransitionAction<S> = Arc<dyn Fn(S, S) -> BoxFuture<'static, ()> + Send + Sync>;

struct Transition<S> {
    to: S,
    action: Option<TransitionAction<S>>,
}

/// Compiled transition graph over a user-chosen state/event pair.
pub struct StateMachine<S: StateKey, E: StateKey> {
    id: String,
    valid_states: HashSet<S>,
    initial_state: S,
    current_state: S,
    end_states: HashSet<S>,
    transitions: HashMap<(S, E), Transition<S>>,
    revisit_budget: HashMap<S, u32>,
    visit_counts: HashMap<S, u32>,
    compiled: bool,
}

impl<S: StateKey, E: StateKey> StateMachine<S, E> {
    pub fn new(
        valid_states: impl IntoIterator<Item = S>,
        initial_state: S,
        end_states: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            valid_states: valid_states.into_iter().collect(),
            initial_state,
            current_state: initial_state,
            end_states: end_states.into_iter().collect(),
            transitions: HashMap::new(),
            revisit_budget: HashMap::new(),
            visit_counts: HashMap::new(),
            compiled: false,
        }
    }

    /// Register one edge. Only valid before `compile`.
    pub fn set_transition(
        &mut self,
        from: S,
        event: E,
        to: S,
        action: Option<TransitionAction<S>>,
    ) -> Result<(), CompileError> {
        if self.compiled {
            return Err(CompileError::AlreadyCompiled);
        }
        self.transitions.insert((from, event), Transition { to, action });
        Ok(())
    }

    /// Validate the graph and arm the revisit budget.
    ///
    /// `max_revisit` is the number of times a state may be re-entered after
    /// its first visit; 0 forbids all revisits.
    pub fn compile(&mut self, max_revisit: u32) -> Result<(), CompileError> {
        if self.compiled {
            return Err(CompileError::AlreadyCompiled);
        }
        if self.valid_states.is_empty() {
            return Err(CompileError::NoStates);
        }
        if self.transitions.is_empty() {
            return Err(CompileError::NoTransitions);
        }
        if self.end_states.is_empty() {
            return Err(CompileError::NoEndStates);
        }
        if !self.valid_states.contains(&self.initial_state) {
            return Err(CompileError::InvalidState(format!("{:?}", self.initial_state)));
        }
        for end in &self.end_states {
            if !self.valid_states.contains(end) {
                return Err(CompileError::InvalidState(format!("{end:?}")));
            }
        }
        for ((from, _), transition) in &self.transitions {
            if !self.valid_states.contains(from) {
                return Err(CompileError::InvalidState(format!("{from:?}")));
            }
            if !self.valid_states.contains(&transition.to) {
                return Err(CompileError::InvalidState(format!("{:?}", transition.to)));
            }
        }

        let forward = self.reach_forward();
        let mut unreachable: Vec<String> = self
            .valid_states
            .iter()
            .filter(|s| !forward.contains(s))
            .map(|s| format!("{s:?}"))
            .collect();
        if !unreachable.is_empty() {
            unreachable.sort();
            return Err(CompileError::Unreachable(unreachable));
        }

        let backward = self.reach_backward();
        let mut dead: Vec<String> = self
            .valid_states
            .iter()
            .filter(|s| !backward.contains(s))
            .map(|s| format!("{s:?}"))
            .collect();
        if !dead.is_empty() {
            dead.sort();
            return Err(CompileError::NoPathToEnd(dead));
        }

        self.revisit_budget = self.valid_states.iter().map(|s| (*s, max_revisit)).collect();
        self.reset_visit_counts();
        self.compiled = true;
        Ok(())
    }

    /// States reachable from the initial state.
    fn reach_forward(&self) -> HashSet<S> {
        let mut seen: HashSet<S> = HashSet::from([self.initial_state]);
        let mut queue: VecDeque<S> = VecDeque::from([self.initial_state]);
        while let Some(state) = queue.pop_front() {
            for ((from, _), transition) in &self.transitions {
                if *from == state && seen.insert(transition.to) {
                    queue.push_back(transition.to);
                }
            }
        }
        seen
    }

    /// States with a forward path to some end state (reverse BFS).
    fn reach_backward(&self) -> HashSet<S> {
        let mut seen: HashSet<S> = self.end_states.iter().copied().collect();
        let mut queue: VecDeque<S> = seen.iter().copied().collect();
        while let Some(state) = queue.pop_front() {
            for ((from, _), transition) in &self.transitions {
                if transition.to == state && seen.insert(*from) {
                    queue.push_back(*from);
                }
            }
        }
        seen
    }

    fn reset_visit_counts(&mut self) {
        self.visit_counts = self.valid_states.iter().map(|s| (*s, 0)).collect();
        self.visit_counts.insert(self.initial_state, 1);
    }

    /// Resolve the edge for the current state, enforce the revisit budget and
    /// move to the target state. The budget check happens before any mutation
    /// so a rejected event leaves the machine untouched.
    pub async fn handle_event(&mut self, event: E) -> Result<S, MachineError> {
        if !self.compiled {
            return Err(MachineError::NotCompiled);
        }
        let key = (self.current_state, event);
        let (to, action) = match self.transitions.get(&key) {
            Some(t) => (t.to, t.action.clone()),
            None => {
                return Err(MachineError::NoTransition {
                    state: format!("{:?}", self.current_state),
                    event: format!("{event:?}"),
                })
            }
        };

        let visits = self.visit_counts.get(&to).copied().unwrap_or(0);
        let budget = self.revisit_budget.get(&to).copied().unwrap_or(0);
        if visits >= 1 && visits > budget {
            return Err(MachineError::CycleLimitExceeded {
                state: format!("{to:?}"),
            });
        }

        let from = self.current_state;
        self.visit_counts.insert(to, visits + 1);
        self.current_state = to;
        tracing::debug!(machine_id = %self.id, from = ?from, event = ?event, to = ?to, "state transition");
        if let Some(action) = action {
            action(from, to).await;
        }
        Ok(to)
    }

    /// Return to the initial state and re-initialize the visit counts.
    pub fn reset(&mut self) {
        self.current_state = self.initial_state;
        self.reset_visit_counts();
    }

    /// Re-arm the per-state revisit budget after compilation.
    pub fn set_revisit_budget(&mut self, max_revisit: u32) {
        for budget in self.revisit_budget.values_mut() {
            *budget = max_revisit;
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn current_state(&self) -> S {
        self.current_state
    }

    pub fn initial_state(&self) -> S {
        self.initial_state
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    pub fn valid_states(&self) -> &HashSet<S> {
        &self.valid_states
    }

    pub fn end_states(&self) -> &HashSet<S> {
        &self.end_states
    }

    pub fn is_end_state(&self, state: S) -> bool {
        self.end_states.contains(&state)
    }

    /// How many times the state has been entered since the last reset.
    pub fn visit_count(&self, state: S) -> u32 {
        self.visit_counts.get(&state).copied().unwrap_or(0)
    }

    /// Walk an event sequence through the transition table without touching
    /// runtime state. Used by workflow compilation to prove the event chain
    /// terminates.
    pub fn simulate_chain(&self, events: &[E]) -> Result<S, CompileError> {
        let mut state = self.initial_state;
        for event in events {
            match self.transitions.get(&(state, *event)) {
                Some(t) => state = t.to,
                None => {
                    return Err(CompileError::ChainBroken {
                        state: format!("{state:?}"),
                        event: format!("{event:?}"),
                    })
                }
            }
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum S {
        A,
        B,
        C,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum E {
        Go,
        Retry,
        End,
    }

    fn linear_machine() -> StateMachine<S, E> {
        let mut m = StateMachine::new([S::A, S::B, S::C], S::A, [S::C]);
        m.set_transition(S::A, E::Go, S::B, None).expect("edge");
        m.set_transition(S::B, E::Retry, S::B, None).expect("edge");
        m.set_transition(S::B, E::End, S::C, None).expect("edge");
        m
    }

    #[test]
    fn test_compile_accepts_reachable_graph() {
        let mut m = linear_machine();
        m.compile(1).expect("compile");
        assert!(m.is_compiled());
        assert_eq!(m.current_state(), S::A);
    }

    #[test]
    fn test_compile_rejects_unreachable_state() {
        let mut m = StateMachine::new([S::A, S::B, S::C], S::A, [S::C]);
        m.set_transition(S::A, E::Go, S::C, None).expect("edge");
        match m.compile(0) {
            Err(CompileError::Unreachable(states)) => {
                assert_eq!(states, vec!["B".to_string()]);
            }
            other => panic!("expected unreachable error, got {other:?}"),
        }
    }

    #[test]
    fn test_compile_rejects_state_without_path_to_end() {
        let mut m = StateMachine::new([S::A, S::B, S::C], S::A, [S::C]);
        m.set_transition(S::A, E::Go, S::B, None).expect("edge");
        m.set_transition(S::A, E::End, S::C, None).expect("edge");
        match m.compile(0) {
            Err(CompileError::NoPathToEnd(states)) => {
                assert_eq!(states, vec!["B".to_string()]);
            }
            other => panic!("expected dead-end error, got {other:?}"),
        }
    }

    #[test]
    fn test_compile_rejects_transition_outside_valid_set() {
        let mut m = StateMachine::new([S::A, S::C], S::A, [S::C]);
        m.set_transition(S::A, E::Go, S::B, None).expect("edge");
        m.set_transition(S::A, E::End, S::C, None).expect("edge");
        assert!(matches!(m.compile(0), Err(CompileError::InvalidState(_))));
    }

    #[test]
    fn test_set_transition_fails_after_compile() {
        let mut m = linear_machine();
        m.compile(0).expect("compile");
        assert_eq!(
            m.set_transition(S::A, E::End, S::C, None),
            Err(CompileError::AlreadyCompiled)
        );
    }

    #[tokio::test]
    async fn test_handle_event_follows_edges() {
        let mut m = linear_machine();
        m.compile(0).expect("compile");
        assert_eq!(m.handle_event(E::Go).await.expect("go"), S::B);
        assert_eq!(m.handle_event(E::End).await.expect("end"), S::C);
    }

    #[tokio::test]
    async fn test_handle_event_rejects_unknown_edge() {
        let mut m = linear_machine();
        m.compile(0).expect("compile");
        match m.handle_event(E::End).await {
            Err(MachineError::NoTransition { state, event }) => {
                assert_eq!(state, "A");
                assert_eq!(event, "End");
            }
            other => panic!("expected no-transition error, got {other:?}"),
        }
        assert_eq!(m.current_state(), S::A);
    }

    #[tokio::test]
    async fn test_revisit_budget_bounds_cycles() {
        let mut m = linear_machine();
        m.compile(1).expect("compile");
        m.handle_event(E::Go).await.expect("go");
        // First revisit of B is inside the budget, the second is not.
        m.handle_event(E::Retry).await.expect("first retry");
        match m.handle_event(E::Retry).await {
            Err(MachineError::CycleLimitExceeded { state }) => assert_eq!(state, "B"),
            other => panic!("expected cycle limit error, got {other:?}"),
        }
        assert_eq!(m.current_state(), S::B);
    }

    #[tokio::test]
    async fn test_zero_budget_forbids_all_revisits() {
        let mut m = linear_machine();
        m.compile(0).expect("compile");
        m.handle_event(E::Go).await.expect("go");
        assert!(matches!(
            m.handle_event(E::Retry).await,
            Err(MachineError::CycleLimitExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_transition_action_observes_new_state() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let mut m = linear_machine();
        m.set_transition(
            S::A,
            E::Go,
            S::B,
            Some(Arc::new(move |from, to| {
                let seen = seen.clone();
                Box::pin(async move {
                    assert_eq!(from, S::A);
                    assert_eq!(to, S::B);
                    seen.fetch_add(1, Ordering::SeqCst);
                })
            })),
        )
        .expect("edge");
        m.compile(0).expect("compile");
        m.handle_event(E::Go).await.expect("go");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reset_restores_initial_state_and_budget() {
        let mut m = linear_machine();
        m.compile(1).expect("compile");
        m.handle_event(E::Go).await.expect("go");
        m.handle_event(E::Retry).await.expect("retry");
        m.reset();
        assert_eq!(m.current_state(), S::A);
        assert_eq!(m.visit_count(S::A), 1);
        assert_eq!(m.visit_count(S::B), 0);
        m.handle_event(E::Go).await.expect("go again");
        m.handle_event(E::Retry).await.expect("budget re-armed");
    }

    #[test]
    fn test_simulate_chain_reports_broken_links() {
        let mut m = linear_machine();
        m.compile(0).expect("compile");
        assert_eq!(m.simulate_chain(&[E::Go, E::End]).expect("chain"), S::C);
        assert!(matches!(
            m.simulate_chain(&[E::End]),
            Err(CompileError::ChainBroken { .. })
        ));
    }
}
