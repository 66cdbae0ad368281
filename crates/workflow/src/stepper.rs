//! Action stepper over the hiring workflow store.
//!
//! Computes the set of currently valid actions and dispatches them as
//! events. Invalid actions are rejected with a diagnostic, never silently
//! transitioned.

use crate::hiring::{actions_for, HiringWorkflow, WorkFlowAction, WorkflowStatus};
use crate::store::WorkflowStore;

#[derive(Debug, Default, Clone)]
pub struct WorkflowStepper {
  store: WorkflowStore<HiringWorkflow>,
}

impl WorkflowStepper {
  pub fn new() -> Self {
    Self {
      store: WorkflowStore::new(),
    }
  }

  pub fn from_status(status: WorkflowStatus) -> Self {
    let mut store = WorkflowStore::new();
    store.set_state(status, None);
    Self { store }
  }

  pub fn status(&self) -> WorkflowStatus {
    self.store.state()
  }

  pub fn status_before_cancel(&self) -> Option<WorkflowStatus> {
    self.store.status_before_cancel()
  }

  pub fn step_index(&self) -> usize {
    self.store.step_index()
  }

  pub fn actions(&self) -> &'static [WorkFlowAction] {
    actions_for(self.store.state())
  }

  pub fn can_perform(&self, action: WorkFlowAction) -> bool {
    self.actions().contains(&action)
  }

  pub fn can_cancel(&self) -> bool {
    self.store.can_cancel()
  }

  /// Map the action to its event and dispatch. Returns whether the store
  /// transitioned.
  pub fn send_action(&mut self, action: WorkFlowAction) -> bool {
    if !self.can_perform(action) {
      tracing::warn!(status = %self.status(), ?action, "action not valid in current status");
      return false;
    }
    match action {
      WorkFlowAction::Cancel => self.store.cancel(),
      _ => self.store.send(&action.to_event()),
    }
  }

  pub fn store(&self) -> &WorkflowStore<HiringWorkflow> {
    &self.store
  }

  pub fn store_mut(&mut self) -> &mut WorkflowStore<HiringWorkflow> {
    &mut self.store
  }
}
