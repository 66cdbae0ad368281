//! Peer presence reconciliation.
//!
//! State is a snapshot plus incremental diffs. Diffs that arrive before the
//! first snapshot are queued and replayed in receipt order once the baseline
//! exists — partial information is never applied first, and no diff is
//! dropped or reordered.

use crate::api::{PresenceDiffPayload, PresenceSnapshotItem};
use crate::newtypes::LocalUserId;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresencePhase {
  #[default]
  Unknown,
  Ready,
  Subscribed,
}

#[derive(Debug, Default)]
pub struct PresenceStore {
  phase: PresencePhase,
  /// Signed unix millis per user: positive = online since, non-positive =
  /// offline, last seen at `|value|`.
  peers: HashMap<LocalUserId, i64>,
  queued: VecDeque<PresenceDiffPayload>,
}

impl PresenceStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn phase(&self) -> PresencePhase {
    self.phase
  }

  /// Replace state wholesale with a snapshot, then drain any diffs queued
  /// while the phase was still unknown.
  pub fn set_snapshot(&mut self, items: Vec<PresenceSnapshotItem>) {
    self.peers = items
      .into_iter()
      .map(|item| (item.user_id, item.last_seen_at))
      .collect();
    if self.phase == PresencePhase::Unknown {
      self.phase = PresencePhase::Ready;
    }
    let queued = std::mem::take(&mut self.queued);
    let replayed = queued.len();
    for diff in queued {
      self.apply_diff_now(diff);
    }
    if replayed > 0 {
      tracing::debug!(replayed, "replayed presence diffs queued before snapshot");
    }
  }

  /// Apply a diff, or queue it if no snapshot has arrived yet.
  pub fn apply_diff(&mut self, diff: PresenceDiffPayload) {
    if self.phase == PresencePhase::Unknown {
      self.queued.push_back(diff);
      return;
    }
    self.apply_diff_now(diff);
  }

  fn apply_diff_now(&mut self, diff: PresenceDiffPayload) {
    for item in diff.upserts {
      self.peers.insert(item.user_id, item.last_seen_at);
    }
    for user_id in diff.removes {
      self.peers.remove(&user_id);
    }
  }

  pub fn mark_subscribed(&mut self) {
    if self.phase == PresencePhase::Ready {
      self.phase = PresencePhase::Subscribed;
    }
  }

  /// Three-state answer: `None` means no information yet (pre-snapshot, or
  /// no row for this user) and must not be rendered as offline.
  pub fn peer_online(&self, user_id: LocalUserId) -> Option<bool> {
    if self.phase == PresencePhase::Unknown {
      return None;
    }
    self.peers.get(&user_id).map(|v| *v > 0)
  }

  pub fn last_seen_at(&self, user_id: LocalUserId) -> Option<DateTime<Utc>> {
    let millis = self.peers.get(&user_id).map(|v| v.abs())?;
    DateTime::<Utc>::from_timestamp_millis(millis)
  }

  pub fn online_count(&self) -> usize {
    self.peers.values().filter(|v| **v > 0).count()
  }
}
