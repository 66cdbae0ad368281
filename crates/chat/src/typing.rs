//! Partner-typing indicator.
//!
//! Ephemeral boolean per room, derived from transport events: events from the
//! local user are ignored, rapid repeated identical states are deduplicated,
//! and a stuck "typing" decays to false after a timeout in case the stop
//! event was lost.

use crate::api::TypingPayload;
use crate::newtypes::{ChatRoomId, LocalUserId};
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_millis(120);
pub const DEFAULT_DECAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
struct TypingState {
  typing: bool,
  updated_at: Instant,
}

#[derive(Debug)]
pub struct TypingTracker {
  self_user: LocalUserId,
  dedup_window: Duration,
  decay: Duration,
  rooms: HashMap<ChatRoomId, TypingState>,
}

impl TypingTracker {
  pub fn new(self_user: LocalUserId) -> Self {
    Self::with_windows(self_user, DEFAULT_DEDUP_WINDOW, DEFAULT_DECAY)
  }

  pub fn with_windows(self_user: LocalUserId, dedup_window: Duration, decay: Duration) -> Self {
    Self {
      self_user,
      dedup_window,
      decay,
      rooms: HashMap::new(),
    }
  }

  /// Feed a transport typing event. Returns whether the visible state for
  /// the room changed (self events and dedup hits return false).
  pub fn on_event(&mut self, room_id: &ChatRoomId, payload: &TypingPayload) -> bool {
    if payload.sender_id == self.self_user {
      return false;
    }
    let now = Instant::now();
    let prev = self.rooms.get(room_id).copied();
    if let Some(prev) = prev {
      let duplicate = prev.typing == payload.typing
        && now.duration_since(prev.updated_at) < self.dedup_window;
      if duplicate {
        return false;
      }
    }
    let was_visible = prev.map(|p| self.visible(&p, now)).unwrap_or(false);
    self.rooms.insert(
      room_id.clone(),
      TypingState {
        typing: payload.typing,
        updated_at: now,
      },
    );
    was_visible != payload.typing
  }

  fn visible(&self, state: &TypingState, now: Instant) -> bool {
    state.typing && now.duration_since(state.updated_at) < self.decay
  }

  /// Current partner-typing state for a room, with decay applied lazily.
  pub fn is_partner_typing(&self, room_id: &ChatRoomId) -> bool {
    self
      .rooms
      .get(room_id)
      .map(|state| self.visible(state, Instant::now()))
      .unwrap_or(false)
  }

  /// Drop expired entries.
  pub fn sweep(&mut self) {
    let now = Instant::now();
    let decay = self.decay;
    self
      .rooms
      .retain(|_, state| state.typing && now.duration_since(state.updated_at) < decay);
  }

  pub fn clear(&mut self, room_id: &ChatRoomId) {
    self.rooms.remove(room_id);
  }
}
