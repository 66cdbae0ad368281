//! Generic finite-state-machine store.
//!
//! A `WorkflowSpec` supplies the ordered state list, the transition lookup
//! and the terminal/cancel classification; the store keeps the current state
//! plus the `status_before_cancel` audit pointer. Events with no transition
//! entry for the current state are a silent no-op — not every event is legal
//! in every state, and callers gate actions through the stepper.

use std::fmt::Debug;
use std::marker::PhantomData;

pub trait WorkflowSpec {
  type State: Copy + Eq + Debug + 'static;
  type Event: Debug;

  /// Linear state order used by the stepper UI (`next`/`back`).
  fn order() -> &'static [Self::State];
  fn initial() -> Self::State;
  /// Transition-table lookup. `None` means the event is inapplicable here.
  fn transition(state: Self::State, event: &Self::Event) -> Option<Self::State>;
  /// Direct-assignment escape hatch carried inside the event union, used for
  /// realtime reconciliation and restart.
  fn as_set(event: &Self::Event) -> Option<(Self::State, Option<Self::State>)>;
  fn cancelled() -> Self::State;
  fn is_terminal(state: Self::State) -> bool;
}

#[derive(Debug, Clone)]
pub struct WorkflowStore<W: WorkflowSpec> {
  state: W::State,
  status_before_cancel: Option<W::State>,
  _spec: PhantomData<W>,
}

impl<W: WorkflowSpec> Default for WorkflowStore<W> {
  fn default() -> Self {
    Self::new()
  }
}

impl<W: WorkflowSpec> WorkflowStore<W> {
  pub fn new() -> Self {
    Self {
      state: W::initial(),
      status_before_cancel: None,
      _spec: PhantomData,
    }
  }

  pub fn state(&self) -> W::State {
    self.state
  }

  pub fn status_before_cancel(&self) -> Option<W::State> {
    self.status_before_cancel
  }

  /// Position of the current state in the linear order.
  pub fn step_index(&self) -> usize {
    W::order()
      .iter()
      .position(|s| *s == self.state)
      .unwrap_or(0)
  }

  pub fn can_cancel(&self) -> bool {
    !W::is_terminal(self.state)
  }

  /// Dispatch an event. Returns whether a transition happened.
  pub fn send(&mut self, event: &W::Event) -> bool {
    if let Some((state, status_before_cancel)) = W::as_set(event) {
      self.set_state(state, status_before_cancel);
      return true;
    }
    match W::transition(self.state, event) {
      Some(next) => {
        if next == W::cancelled() {
          self.status_before_cancel = Some(self.state);
        }
        self.state = next;
        true
      }
      None => {
        tracing::debug!(state = ?self.state, event = ?event, "no transition entry, ignoring");
        false
      }
    }
  }

  /// Unconditional state assignment.
  pub fn set_state(&mut self, state: W::State, status_before_cancel: Option<W::State>) {
    self.state = state;
    self.status_before_cancel = status_before_cancel;
  }

  /// Cancel from any non-terminal state, recording where the cancellation
  /// happened. From a terminal state this is a warned no-op; callers are
  /// expected to check `can_cancel` before offering the action.
  pub fn cancel(&mut self) -> bool {
    if W::is_terminal(self.state) {
      tracing::warn!(state = ?self.state, "cancel requested from a terminal state, ignoring");
      return false;
    }
    self.status_before_cancel = Some(self.state);
    self.state = W::cancelled();
    true
  }

  /// Linear step forward along the ordered list, bounded at the end.
  /// Independent of the transition table; clears `status_before_cancel`.
  pub fn next(&mut self) {
    let order = W::order();
    let idx = self.step_index();
    if idx + 1 < order.len() {
      self.state = order[idx + 1];
      self.status_before_cancel = None;
    }
  }

  /// Linear step backward, bounded at the start.
  pub fn back(&mut self) {
    let order = W::order();
    let idx = self.step_index();
    if idx > 0 {
      self.state = order[idx - 1];
      self.status_before_cancel = None;
    }
  }

  pub fn reset(&mut self) {
    self.state = W::initial();
    self.status_before_cancel = None;
  }
}
