//! Typed publish-subscribe bus for decoupled UI updates.
//!
//! Replaces ambient DOM-style custom events with an explicit registry scoped
//! to the session. A listener panic is caught and logged; it never aborts
//! delivery to the remaining listeners.

use crate::api::{ChatMessage, ReadPayload, TypingPayload};
use crate::newtypes::ChatRoomId;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum ChatBusEvent {
  /// New message preview or confirmation.
  Message(ChatMessage),
  Typing {
    room_id: ChatRoomId,
    payload: TypingPayload,
  },
  Read {
    room_id: ChatRoomId,
    payload: ReadPayload,
  },
  Reconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&ChatBusEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
  listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
  next_id: AtomicU64,
}

impl EventBus {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn subscribe(&self, listener: impl Fn(&ChatBusEvent) + Send + Sync + 'static) -> SubscriptionId {
    let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
    let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
    listeners.push((id, Arc::new(listener)));
    id
  }

  pub fn unsubscribe(&self, id: SubscriptionId) {
    let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
    listeners.retain(|(lid, _)| *lid != id);
  }

  pub fn clear(&self) {
    let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
    listeners.clear();
  }

  pub fn publish(&self, event: &ChatBusEvent) {
    // Snapshot outside the dispatch so a listener may subscribe/unsubscribe.
    let snapshot: Vec<Listener> = {
      let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
      listeners.iter().map(|(_, l)| l.clone()).collect()
    };
    for listener in snapshot {
      if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
        tracing::warn!("chat bus listener panicked, continuing dispatch");
      }
    }
  }
}
