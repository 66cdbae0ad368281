//! Per-room unread counters.
//!
//! `total` always equals the sum of the per-room counters; the invariant is
//! maintained incrementally on every mutation and recomputed by full scan
//! only at hydration. State is persisted to durable client storage after
//! every mutation and reloaded at store construction.

use crate::api::UnreadSnapshotItem;
use crate::newtypes::ChatRoomId;
use fastjob_utils::storage::{KeyValueStorage, KeyValueStorageExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub const UNREAD_STORAGE_KEY: &str = "chat_unread_v1";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PersistedUnread {
  per_room: HashMap<String, i64>,
}

pub struct UnreadStore {
  storage: Arc<dyn KeyValueStorage>,
  per_room: HashMap<ChatRoomId, i64>,
  total: i64,
}

impl UnreadStore {
  /// Load the persisted snapshot, if any, and rebuild the running total.
  pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
    let per_room: HashMap<ChatRoomId, i64> = match storage.get_value::<PersistedUnread>(UNREAD_STORAGE_KEY) {
      Ok(Some(persisted)) => persisted
        .per_room
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .map(|(room, n)| (ChatRoomId(room), n))
        .collect(),
      Ok(None) => HashMap::new(),
      Err(e) => {
        tracing::warn!("failed to load unread snapshot, starting empty: {e}");
        HashMap::new()
      }
    };
    let total = per_room.values().sum();
    Self {
      storage,
      per_room,
      total,
    }
  }

  fn persist(&self) {
    let persisted = PersistedUnread {
      per_room: self
        .per_room
        .iter()
        .map(|(room, n)| (room.0.clone(), *n))
        .collect(),
    };
    if let Err(e) = self.storage.set_value(UNREAD_STORAGE_KEY, &persisted) {
      tracing::warn!("failed to persist unread counters: {e}");
    }
  }

  pub fn count(&self, room_id: &ChatRoomId) -> i64 {
    self.per_room.get(room_id).copied().unwrap_or(0)
  }

  pub fn total(&self) -> i64 {
    self.total
  }

  pub fn per_room(&self) -> &HashMap<ChatRoomId, i64> {
    &self.per_room
  }

  /// Add a positive delta to a room counter and the running total. Negative
  /// deltas are clamped to zero; decrements go through `mark_seen`/`set_count`.
  pub fn inc(&mut self, room_id: &ChatRoomId, delta: i64) {
    let delta = delta.max(0);
    if delta == 0 {
      return;
    }
    *self.per_room.entry(room_id.clone()).or_insert(0) += delta;
    self.total += delta;
    self.persist();
  }

  /// Set a room's counter to an absolute value, adjusting the total by the
  /// difference against the previous value.
  pub fn set_count(&mut self, room_id: &ChatRoomId, count: i64) {
    let count = count.max(0);
    let prev = self.count(room_id);
    if count == 0 {
      self.per_room.remove(room_id);
    } else {
      self.per_room.insert(room_id.clone(), count);
    }
    self.total += count - prev;
    self.persist();
  }

  /// Replace the whole map from a server snapshot. Never additive; used once
  /// at session start.
  pub fn hydrate(&mut self, items: Vec<UnreadSnapshotItem>) {
    self.per_room = items
      .into_iter()
      .filter(|item| item.unread_count > 0)
      .map(|item| (item.room_id, item.unread_count))
      .collect();
    self.total = self.per_room.values().sum();
    self.persist();
  }

  /// Zero a room's counter, adjusting the total downward by exactly the
  /// amount removed.
  pub fn mark_seen(&mut self, room_id: &ChatRoomId) {
    if let Some(prev) = self.per_room.remove(room_id) {
      self.total -= prev;
      self.persist();
    }
  }

  pub fn reset(&mut self, room_id: &ChatRoomId) {
    self.mark_seen(room_id);
  }

  pub fn remove_room(&mut self, room_id: &ChatRoomId) {
    self.mark_seen(room_id);
  }
}
