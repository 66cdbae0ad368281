//! Pending-acknowledgment matcher.
//!
//! Tracks client-generated message ids awaiting a server ack, correlates the
//! server-assigned id back to the client id, and evicts stale entries after a
//! TTL. `has_server_id` suppresses duplicate insertion when both an
//! optimistic send and a server-echoed message arrive for the same logical
//! message.

use crate::api::AckPayload;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use uuid::Uuid;

pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(4000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AckSubscriptionId(u64);

type AckListener = Arc<dyn Fn(&AckPayload) + Send + Sync>;

#[derive(Debug, Clone)]
struct PendingEntry {
  /// Empty until the server ack arrives.
  server_id: String,
  expires_at: Instant,
}

#[derive(Default)]
struct Inner {
  entries: HashMap<Uuid, PendingEntry>,
  listeners: Vec<(AckSubscriptionId, AckListener)>,
}

pub struct AckMatcher {
  inner: Mutex<Inner>,
  ttl: Duration,
  next_listener_id: AtomicU64,
  notify: Notify,
}

impl Default for AckMatcher {
  fn default() -> Self {
    Self::new(DEFAULT_PENDING_TTL)
  }
}

impl AckMatcher {
  pub fn new(ttl: Duration) -> Self {
    Self {
      inner: Mutex::new(Inner::default()),
      ttl,
      next_listener_id: AtomicU64::new(0),
      notify: Notify::new(),
    }
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn purge(inner: &mut Inner, now: Instant) {
    inner.entries.retain(|_, e| e.expires_at > now);
  }

  /// Register a client id awaiting acknowledgment. Re-tracking an id that is
  /// already acked keeps the ack and just refreshes the TTL.
  pub fn track_pending(&self, client_id: Uuid) {
    let now = Instant::now();
    let mut inner = self.lock();
    Self::purge(&mut inner, now);
    let expires_at = now + self.ttl;
    inner
      .entries
      .entry(client_id)
      .and_modify(|e| e.expires_at = expires_at)
      .or_insert(PendingEntry {
        server_id: String::new(),
        expires_at,
      });
  }

  /// Record a server acknowledgment and notify subscribers. An ack without a
  /// client-id correlation still reaches subscribers (server-originated
  /// message), it just cannot resolve a pending entry.
  pub fn on_ack(&self, payload: &AckPayload) {
    let now = Instant::now();
    let listeners: Vec<AckListener> = {
      let mut inner = self.lock();
      Self::purge(&mut inner, now);
      if let Some(client_id) = payload.client_id {
        if let Some(entry) = inner.entries.get_mut(&client_id) {
          entry.server_id = payload.server_id.clone();
          entry.expires_at = now + self.ttl;
        }
      }
      inner.listeners.iter().map(|(_, l)| l.clone()).collect()
    };

    for listener in listeners {
      if catch_unwind(AssertUnwindSafe(|| listener(payload))).is_err() {
        tracing::warn!("ack listener panicked, continuing dispatch");
      }
    }
    self.notify.notify_waiters();
  }

  /// True only when the client id has a non-empty server-id mapping.
  pub fn is_acked(&self, client_id: Uuid) -> bool {
    let now = Instant::now();
    let mut inner = self.lock();
    Self::purge(&mut inner, now);
    inner
      .entries
      .get(&client_id)
      .is_some_and(|e| !e.server_id.is_empty())
  }

  /// Linear scan for a message already acknowledged under a different client
  /// id, used to suppress duplicate insertion of a server echo.
  pub fn has_server_id(&self, server_id: &str) -> bool {
    if server_id.is_empty() {
      return false;
    }
    let now = Instant::now();
    let mut inner = self.lock();
    Self::purge(&mut inner, now);
    inner.entries.values().any(|e| e.server_id == server_id)
  }

  pub fn pending_len(&self) -> usize {
    let now = Instant::now();
    let mut inner = self.lock();
    Self::purge(&mut inner, now);
    inner.entries.len()
  }

  /// Drop expired entries. Eviction is also applied lazily on every
  /// operation; this exists for housekeeping sweeps.
  pub fn sweep(&self) {
    let mut inner = self.lock();
    Self::purge(&mut inner, Instant::now());
  }

  pub fn subscribe(&self, listener: impl Fn(&AckPayload) + Send + Sync + 'static) -> AckSubscriptionId {
    let id = AckSubscriptionId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
    let mut inner = self.lock();
    inner.listeners.push((id, Arc::new(listener)));
    id
  }

  pub fn unsubscribe(&self, id: AckSubscriptionId) {
    let mut inner = self.lock();
    inner.listeners.retain(|(lid, _)| *lid != id);
  }

  /// Suspend until the client id is acked or the timeout elapses. Resolves
  /// `false` on timeout, which means "unconfirmed", not "failed" — the
  /// message may still arrive and the UI may offer a manual retry.
  pub async fn wait_for_ack(&self, client_id: Uuid, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
      // Arm the waiter before re-checking so an ack between the check and
      // the await is not lost.
      let notified = self.notify.notified();
      if self.is_acked(client_id) {
        return true;
      }
      let now = Instant::now();
      if now >= deadline {
        return false;
      }
      if tokio::time::timeout(deadline - now, notified).await.is_err() {
        return false;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::newtypes::{ChatRoomId, LocalUserId};
  use pretty_assertions::assert_eq;
  use std::sync::atomic::AtomicUsize;

  fn ack(client_id: Option<Uuid>, server_id: &str) -> AckPayload {
    AckPayload {
      client_id,
      server_id: server_id.to_string(),
      room_id: ChatRoomId("r1".into()),
      sender_id: LocalUserId(1),
    }
  }

  #[test]
  fn ack_matches_tracked_client_id() {
    let matcher = AckMatcher::default();
    let id = Uuid::new_v4();
    matcher.track_pending(id);
    assert!(!matcher.is_acked(id));

    matcher.on_ack(&ack(Some(id), "S1"));
    assert!(matcher.is_acked(id));
    assert!(matcher.has_server_id("S1"));

    // An unrelated ack does not disturb the mapping.
    let other = Uuid::new_v4();
    matcher.track_pending(other);
    matcher.on_ack(&ack(Some(other), "S2"));
    assert!(matcher.is_acked(id));
    assert!(matcher.has_server_id("S1"));
  }

  #[test]
  fn untracked_ack_is_not_recorded() {
    let matcher = AckMatcher::default();
    matcher.on_ack(&ack(Some(Uuid::new_v4()), "S9"));
    assert!(!matcher.has_server_id("S9"));
  }

  #[test]
  fn ttl_evicts_stale_entries() {
    let matcher = AckMatcher::new(Duration::from_millis(0));
    let id = Uuid::new_v4();
    matcher.track_pending(id);
    matcher.sweep();
    assert_eq!(matcher.pending_len(), 0);
    assert!(!matcher.is_acked(id));
  }

  #[test]
  fn subscriber_panic_is_isolated() {
    let matcher = AckMatcher::default();
    let hits = Arc::new(AtomicUsize::new(0));
    matcher.subscribe(|_| panic!("observer bug"));
    {
      let hits = hits.clone();
      matcher.subscribe(move |_| {
        hits.fetch_add(1, Ordering::SeqCst);
      });
    }
    matcher.on_ack(&ack(None, "S1"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn wait_for_ack_resolves_on_ack() {
    let matcher = Arc::new(AckMatcher::default());
    let id = Uuid::new_v4();
    matcher.track_pending(id);

    let waiter = {
      let matcher = matcher.clone();
      tokio::spawn(async move { matcher.wait_for_ack(id, DEFAULT_ACK_TIMEOUT).await })
    };
    tokio::task::yield_now().await;
    matcher.on_ack(&ack(Some(id), "S1"));
    assert!(waiter.await.unwrap());
  }

  #[tokio::test(start_paused = true)]
  async fn wait_for_ack_times_out_as_unconfirmed() {
    let matcher = AckMatcher::default();
    let id = Uuid::new_v4();
    matcher.track_pending(id);
    assert!(!matcher.wait_for_ack(id, Duration::from_millis(50)).await);
  }
}
