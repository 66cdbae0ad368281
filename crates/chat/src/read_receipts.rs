//! Last-read cursors per (room, user).
//!
//! Updates are monotonic: a write commits only when the new timestamp is
//! strictly greater than the stored one, so out-of-order delivery of read
//! receipts can never regress a cursor. Peer and self cursors share the same
//! storage and rule.

use crate::newtypes::{ChatRoomId, LocalUserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ReadReceiptStore {
  last_read: HashMap<(ChatRoomId, LocalUserId), DateTime<Utc>>,
}

impl ReadReceiptStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Commit a read cursor if it advances the stored one. `None` input is a
  /// deliberate no-op (guards against accidental clears); an unparseable
  /// timestamp is logged and ignored. Returns whether the write committed.
  pub fn set_last_read_at(
    &mut self,
    room_id: &ChatRoomId,
    user_id: LocalUserId,
    at: Option<&str>,
  ) -> bool {
    let Some(raw) = at else {
      return false;
    };
    let parsed = match DateTime::parse_from_rfc3339(raw) {
      Ok(dt) => dt.with_timezone(&Utc),
      Err(e) => {
        tracing::warn!(room = %room_id, user = %user_id, raw, "unparseable read cursor: {e}");
        return false;
      }
    };
    self.commit(room_id, user_id, parsed)
  }

  /// Same monotonic rule for an already-parsed timestamp.
  pub fn commit(&mut self, room_id: &ChatRoomId, user_id: LocalUserId, at: DateTime<Utc>) -> bool {
    let key = (room_id.clone(), user_id);
    match self.last_read.get(&key) {
      Some(stored) if *stored >= at => {
        tracing::debug!(room = %room_id, user = %user_id, "stale read cursor rejected");
        false
      }
      _ => {
        self.last_read.insert(key, at);
        true
      }
    }
  }

  pub fn get_last_read_at(&self, room_id: &ChatRoomId, user_id: LocalUserId) -> Option<DateTime<Utc>> {
    self.last_read.get(&(room_id.clone(), user_id)).copied()
  }
}
