//! Hiring workflow: quotation → approval → work → delivery → review →
//! payment or cancellation, governing a job's lifecycle inside a chat room.

use crate::store::WorkflowSpec;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

#[derive(
  Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter,
)]
#[serde(rename_all = "camelCase")]
pub enum WorkflowStatus {
  WaitForFreelancerQuotation,
  QuotationPendingReview,
  OrderApproved,
  InProgress,
  PendingEmployerReview,
  Completed,
  Cancelled,
}

impl WorkflowStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, WorkflowStatus::Completed | WorkflowStatus::Cancelled)
  }
}

/// Linear order used by the stepper UI. `Cancelled` sits past `Completed` so
/// every status has a stable index; linear navigation never lands on it.
pub const ORDER: [WorkflowStatus; 7] = [
  WorkflowStatus::WaitForFreelancerQuotation,
  WorkflowStatus::QuotationPendingReview,
  WorkflowStatus::OrderApproved,
  WorkflowStatus::InProgress,
  WorkflowStatus::PendingEmployerReview,
  WorkflowStatus::Completed,
  WorkflowStatus::Cancelled,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowEvent {
  QuoteProposed,
  ApproveOrder,
  StartWork,
  SubmitDelivery,
  RequestRevision,
  ReleasePayment,
  Cancel,
  /// Direct state assignment, used for realtime reconciliation and restart.
  #[serde(rename = "SET", rename_all = "camelCase")]
  Set {
    state: WorkflowStatus,
    status_before_cancel: Option<WorkflowStatus>,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter)]
#[serde(rename_all = "camelCase")]
pub enum WorkFlowAction {
  SubmitQuotation,
  ApproveOrder,
  StartWork,
  SubmitDelivery,
  RequestRevision,
  ReleasePayment,
  Cancel,
  Restart,
}

impl WorkFlowAction {
  /// Every action maps to exactly one event; `Restart` maps to `SET` back to
  /// the initial state.
  pub fn to_event(self) -> WorkflowEvent {
    match self {
      WorkFlowAction::SubmitQuotation => WorkflowEvent::QuoteProposed,
      WorkFlowAction::ApproveOrder => WorkflowEvent::ApproveOrder,
      WorkFlowAction::StartWork => WorkflowEvent::StartWork,
      WorkFlowAction::SubmitDelivery => WorkflowEvent::SubmitDelivery,
      WorkFlowAction::RequestRevision => WorkflowEvent::RequestRevision,
      WorkFlowAction::ReleasePayment => WorkflowEvent::ReleasePayment,
      WorkFlowAction::Cancel => WorkflowEvent::Cancel,
      WorkFlowAction::Restart => WorkflowEvent::Set {
        state: WorkflowStatus::WaitForFreelancerQuotation,
        status_before_cancel: None,
      },
    }
  }
}

/// Actions a participant may perform in each status, the UI contract.
pub fn actions_for(status: WorkflowStatus) -> &'static [WorkFlowAction] {
  match status {
    WorkflowStatus::WaitForFreelancerQuotation => {
      &[WorkFlowAction::SubmitQuotation, WorkFlowAction::Cancel]
    }
    WorkflowStatus::QuotationPendingReview => {
      &[WorkFlowAction::ApproveOrder, WorkFlowAction::Cancel]
    }
    WorkflowStatus::OrderApproved => &[WorkFlowAction::StartWork, WorkFlowAction::Cancel],
    WorkflowStatus::InProgress => &[WorkFlowAction::SubmitDelivery, WorkFlowAction::Cancel],
    WorkflowStatus::PendingEmployerReview => &[
      WorkFlowAction::RequestRevision,
      WorkFlowAction::ReleasePayment,
      WorkFlowAction::Cancel,
    ],
    WorkflowStatus::Completed => &[WorkFlowAction::Restart],
    WorkflowStatus::Cancelled => &[WorkFlowAction::Restart],
  }
}

#[derive(Debug, Clone, Copy)]
pub struct HiringWorkflow;

impl WorkflowSpec for HiringWorkflow {
  type State = WorkflowStatus;
  type Event = WorkflowEvent;

  fn order() -> &'static [WorkflowStatus] {
    &ORDER
  }

  fn initial() -> WorkflowStatus {
    WorkflowStatus::WaitForFreelancerQuotation
  }

  fn transition(state: WorkflowStatus, event: &WorkflowEvent) -> Option<WorkflowStatus> {
    use WorkflowEvent as E;
    use WorkflowStatus as S;
    match (state, event) {
      (S::WaitForFreelancerQuotation, E::QuoteProposed) => Some(S::QuotationPendingReview),
      (S::QuotationPendingReview, E::ApproveOrder) => Some(S::OrderApproved),
      (S::OrderApproved, E::StartWork) => Some(S::InProgress),
      (S::InProgress, E::SubmitDelivery) => Some(S::PendingEmployerReview),
      (S::PendingEmployerReview, E::RequestRevision) => Some(S::InProgress),
      (S::PendingEmployerReview, E::ReleasePayment) => Some(S::Completed),
      (s, E::Cancel) if !s.is_terminal() => Some(S::Cancelled),
      _ => None,
    }
  }

  fn as_set(event: &WorkflowEvent) -> Option<(WorkflowStatus, Option<WorkflowStatus>)> {
    match event {
      WorkflowEvent::Set {
        state,
        status_before_cancel,
      } => Some((*state, *status_before_cancel)),
      _ => None,
    }
  }

  fn cancelled() -> WorkflowStatus {
    WorkflowStatus::Cancelled
  }

  fn is_terminal(state: WorkflowStatus) -> bool {
    state.is_terminal()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn events_serialize_with_type_tag() {
    let json = serde_json::to_string(&WorkflowEvent::QuoteProposed).unwrap();
    assert_eq!(json, "{\"type\":\"QUOTE_PROPOSED\"}");

    let set = WorkflowEvent::Set {
      state: WorkflowStatus::Cancelled,
      status_before_cancel: Some(WorkflowStatus::InProgress),
    };
    let json = serde_json::to_string(&set).unwrap();
    assert_eq!(
      json,
      "{\"type\":\"SET\",\"state\":\"cancelled\",\"statusBeforeCancel\":\"inProgress\"}"
    );
  }

  #[test]
  fn every_action_maps_to_one_event() {
    use strum::IntoEnumIterator;
    for action in WorkFlowAction::iter() {
      match (action, action.to_event()) {
        (WorkFlowAction::Restart, WorkflowEvent::Set { state, .. }) => {
          assert_eq!(state, WorkflowStatus::WaitForFreelancerQuotation);
        }
        (WorkFlowAction::Restart, other) => panic!("restart mapped to {other:?}"),
        (_, WorkflowEvent::Set { .. }) => panic!("only restart may map to SET"),
        _ => {}
      }
    }
  }

  #[test]
  fn order_contains_every_status_once() {
    use strum::IntoEnumIterator;
    for status in WorkflowStatus::iter() {
      assert_eq!(ORDER.iter().filter(|s| **s == status).count(), 1);
    }
  }
}
