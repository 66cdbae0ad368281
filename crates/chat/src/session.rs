//! Chat session facade.
//!
//! Owns the per-session stores (presence, unread, read receipts, typing,
//! per-room message lists) and routes inbound transport events to them.
//! Room message state lives behind an async lock because history fetches
//! await while merging pages.

use crate::ack::AckMatcher;
use crate::api::{
  AckPayload, ChatEvent, ChatMessage, IncomingEvent, PresenceDiffPayload, PresenceSnapshotItem,
  ReadPayload, TypingPayload, UnreadSnapshotItem,
};
use crate::bus::{ChatBusEvent, EventBus};
use crate::history::{HistoryFetcher, HistoryPager, MessageStore};
use crate::newtypes::{ChatRoomId, LocalUserId};
use crate::presence::PresenceStore;
use crate::read_receipts::ReadReceiptStore;
use crate::send::{MessageSender, SendOptions};
use crate::transport::{ws_send, Transport};
use crate::typing::TypingTracker;
use crate::unread::UnreadStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fastjob_utils::error::{FastJobErrorType, FastJobResult};
use fastjob_utils::keys::{KeyRecord, SecureKeyStore};
use fastjob_utils::storage::KeyValueStorage;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct IdentityKeyPair {
  pub public_key_hex: String,
  pub private_key_hex: String,
}

/// End-to-end key bootstrap. The concrete implementation (platform keystore,
/// remote exchange endpoint) is an external collaborator; the session only
/// drives the once-per-login sequence.
#[async_trait]
pub trait KeyExchange: Send + Sync {
  async fn ensure_identity_key_pair(&self) -> FastJobResult<IdentityKeyPair>;
  async fn exchange_public_key(&self, public_key_hex: &str) -> FastJobResult<()>;
  async fn ensure_shared_key_for_local_user(&self, user_id: LocalUserId) -> FastJobResult<()>;
}

struct RoomState {
  messages: MessageStore,
  pager: HistoryPager,
}

impl RoomState {
  fn new(room_id: ChatRoomId) -> Self {
    Self {
      messages: MessageStore::new(),
      pager: HistoryPager::new(room_id),
    }
  }
}

pub struct ChatSession {
  transport: Arc<dyn Transport>,
  bus: Arc<EventBus>,
  ack: Arc<AckMatcher>,
  sender: MessageSender,
  presence: Mutex<PresenceStore>,
  unread: Mutex<UnreadStore>,
  read_receipts: Mutex<ReadReceiptStore>,
  typing: Mutex<Option<TypingTracker>>,
  rooms: tokio::sync::Mutex<HashMap<ChatRoomId, RoomState>>,
  local_user: Mutex<Option<LocalUserId>>,
  active_room: Mutex<Option<ChatRoomId>>,
  key_store: Option<Arc<dyn SecureKeyStore>>,
  encryption_ready: Mutex<bool>,
}

fn identity_key_id(user_id: LocalUserId) -> String {
  format!("identity:{user_id}")
}

impl ChatSession {
  pub fn new(transport: Arc<dyn Transport>, storage: Arc<dyn KeyValueStorage>) -> Self {
    let bus = Arc::new(EventBus::new());
    let ack = Arc::new(AckMatcher::default());
    let sender = MessageSender::new(transport.clone(), bus.clone(), ack.clone());
    Self {
      transport,
      bus,
      ack,
      sender,
      presence: Mutex::new(PresenceStore::new()),
      unread: Mutex::new(UnreadStore::new(storage)),
      read_receipts: Mutex::new(ReadReceiptStore::new()),
      typing: Mutex::new(None),
      rooms: tokio::sync::Mutex::new(HashMap::new()),
      local_user: Mutex::new(None),
      active_room: Mutex::new(None),
      key_store: None,
      encryption_ready: Mutex::new(false),
    }
  }

  /// Attach a durable key store; without one, identity key material is
  /// re-provisioned on every login.
  pub fn with_key_store(mut self, key_store: Arc<dyn SecureKeyStore>) -> Self {
    self.key_store = Some(key_store);
    self
  }

  pub fn bus(&self) -> &EventBus {
    &self.bus
  }

  pub fn ack(&self) -> Arc<AckMatcher> {
    self.ack.clone()
  }

  pub fn sender(&self) -> &MessageSender {
    &self.sender
  }

  pub fn local_user(&self) -> Option<LocalUserId> {
    *lock(&self.local_user)
  }

  /// Bind the session to a user. Key bootstrap is best-effort: a failure is
  /// logged and the session continues unencrypted rather than refusing to
  /// start.
  pub async fn login(&self, user_id: LocalUserId, key_exchange: Option<&dyn KeyExchange>) {
    *lock(&self.local_user) = Some(user_id);
    *lock(&self.typing) = Some(TypingTracker::new(user_id));
    if let Some(kx) = key_exchange {
      self.bootstrap_encryption(kx, user_id).await;
    }
  }

  async fn bootstrap_encryption(&self, kx: &dyn KeyExchange, user_id: LocalUserId) {
    if *lock(&self.encryption_ready) {
      return;
    }
    let result: FastJobResult<()> = async {
      let pair = kx.ensure_identity_key_pair().await?;
      self.cache_identity_key(user_id, &pair);
      kx.exchange_public_key(&pair.public_key_hex).await?;
      kx.ensure_shared_key_for_local_user(user_id).await?;
      Ok(())
    }
    .await;
    match result {
      Ok(()) => *lock(&self.encryption_ready) = true,
      Err(e) => tracing::warn!(user = %user_id, "encryption bootstrap failed, continuing without: {e}"),
    }
  }

  fn cache_identity_key(&self, user_id: LocalUserId, pair: &IdentityKeyPair) {
    let Some(key_store) = &self.key_store else {
      return;
    };
    let id = identity_key_id(user_id);
    match key_store.get_key(&id) {
      Ok(Some(_)) => return,
      Ok(None) => {}
      Err(e) => {
        tracing::warn!(user = %user_id, "key store read failed: {e}");
        return;
      }
    }
    let record = KeyRecord::Raw {
      material_hex: pair.private_key_hex.clone(),
    };
    if let Err(e) = key_store.put_key(&id, record) {
      tracing::warn!(user = %user_id, "failed to cache identity key: {e}");
    }
  }

  pub async fn logout(&self) {
    *lock(&self.local_user) = None;
    *lock(&self.active_room) = None;
    *lock(&self.typing) = None;
    *lock(&self.encryption_ready) = false;
    self.rooms.lock().await.clear();
  }

  /// Drop all bus listeners; called when the owning surface goes away.
  pub fn teardown(&self) {
    self.bus.clear();
  }

  /// Replace unread counters from a server snapshot at session start.
  pub fn hydrate_unread(&self, items: Vec<UnreadSnapshotItem>) {
    lock(&self.unread).hydrate(items);
  }

  pub fn unread_total(&self) -> i64 {
    lock(&self.unread).total()
  }

  pub fn unread_count(&self, room_id: &ChatRoomId) -> i64 {
    lock(&self.unread).count(room_id)
  }

  pub fn peer_online(&self, user_id: LocalUserId) -> Option<bool> {
    lock(&self.presence).peer_online(user_id)
  }

  pub fn peer_last_seen_at(&self, user_id: LocalUserId) -> Option<DateTime<Utc>> {
    lock(&self.presence).last_seen_at(user_id)
  }

  pub fn is_partner_typing(&self, room_id: &ChatRoomId) -> bool {
    lock(&self.typing)
      .as_ref()
      .map(|t| t.is_partner_typing(room_id))
      .unwrap_or(false)
  }

  pub fn last_read_at(&self, room_id: &ChatRoomId, user_id: LocalUserId) -> Option<DateTime<Utc>> {
    lock(&self.read_receipts).get_last_read_at(room_id, user_id)
  }

  /// Make a room the active one: its unread counter zeroes and new inbound
  /// messages in it no longer count as unread.
  pub async fn enter_room(&self, room_id: &ChatRoomId) {
    *lock(&self.active_room) = Some(room_id.clone());
    lock(&self.unread).mark_seen(room_id);
    let mut rooms = self.rooms.lock().await;
    rooms
      .entry(room_id.clone())
      .or_insert_with(|| RoomState::new(room_id.clone()));
  }

  pub fn leave_room(&self) {
    *lock(&self.active_room) = None;
  }

  pub async fn messages_snapshot(&self, room_id: &ChatRoomId) -> Vec<ChatMessage> {
    let rooms = self.rooms.lock().await;
    rooms
      .get(room_id)
      .map(|state| state.messages.messages().to_vec())
      .unwrap_or_default()
  }

  /// Page one step further into the room's past.
  pub async fn fetch_older(
    &self,
    room_id: &ChatRoomId,
    fetcher: &dyn HistoryFetcher,
  ) -> FastJobResult<usize> {
    let mut rooms = self.rooms.lock().await;
    let state = rooms
      .entry(room_id.clone())
      .or_insert_with(|| RoomState::new(room_id.clone()));
    let RoomState { messages, pager } = state;
    pager.fetch_history(fetcher, messages).await
  }

  pub async fn send_text(&self, room_id: &ChatRoomId, content: &str) -> FastJobResult<Uuid> {
    let Some(user_id) = self.local_user() else {
      return Err(FastJobErrorType::NotLoggedIn.into());
    };
    let mut rooms = self.rooms.lock().await;
    let state = rooms
      .entry(room_id.clone())
      .or_insert_with(|| RoomState::new(room_id.clone()));
    self
      .sender
      .send_text(&mut state.messages, room_id, content, user_id, &SendOptions::secure())
  }

  pub async fn retry_message(&self, room_id: &ChatRoomId, client_id: Uuid) -> FastJobResult<()> {
    let mut rooms = self.rooms.lock().await;
    let Some(state) = rooms.get_mut(room_id) else {
      return Err(FastJobErrorType::NotFound.into());
    };
    self.sender.retry_message(&mut state.messages, room_id, client_id)
  }

  /// Announce the local user's typing state to the room.
  pub fn notify_typing(&self, room_id: &ChatRoomId, typing: bool) -> bool {
    let Some(user_id) = self.local_user() else {
      return false;
    };
    let event = if typing {
      ChatEvent::TypingStart
    } else {
      ChatEvent::TypingStop
    };
    let payload = json!({ "senderId": user_id, "typing": typing });
    ws_send(self.transport.as_ref(), &event, room_id, &payload)
  }

  /// Route one inbound transport event to its store. Unknown events are
  /// logged and dropped; a malformed payload fails only its own event.
  pub async fn dispatch_inbound(&self, event: IncomingEvent) -> FastJobResult<()> {
    match event.event {
      ChatEvent::Message => self.on_message(event).await,
      ChatEvent::Update => self.on_update(event).await,
      ChatEvent::Ack => self.on_ack(event).await,
      ChatEvent::Read => self.on_read(event).await,
      ChatEvent::Typing | ChatEvent::TypingStart | ChatEvent::TypingStop => self.on_typing(event),
      ChatEvent::PresenceSnapshot => self.on_presence_snapshot(event),
      ChatEvent::PresenceDiff => self.on_presence_diff(event),
      ChatEvent::Reconnected => {
        self.bus.publish(&ChatBusEvent::Reconnected);
        Ok(())
      }
      ChatEvent::PhxJoin | ChatEvent::PhxLeave | ChatEvent::Heartbeat | ChatEvent::Unknown => {
        tracing::debug!(event = event.event.as_str(), topic = %event.topic, "ignoring inbound event");
        Ok(())
      }
    }
  }

  async fn on_message(&self, event: IncomingEvent) -> FastJobResult<()> {
    let message = ChatMessage::try_from(event.payload)
      .map_err(|_| FastJobErrorType::DeserializationFailed)?;

    // A server echo of a message we already confirmed via ack would insert a
    // duplicate under the server id.
    if self.ack.has_server_id(&message.id.0) {
      tracing::debug!(id = %message.id, "suppressing server echo of an acked message");
      return Ok(());
    }

    let own = self.local_user() == Some(message.sender_id);
    let active = lock(&self.active_room).as_ref() == Some(&event.room_id);

    {
      let mut rooms = self.rooms.lock().await;
      let state = rooms
        .entry(event.room_id.clone())
        .or_insert_with(|| RoomState::new(event.room_id.clone()));
      if !state.messages.insert(message.clone()) {
        return Ok(());
      }
    }

    if !own && !active {
      lock(&self.unread).inc(&event.room_id, 1);
    }
    self.bus.publish(&ChatBusEvent::Message(message));
    Ok(())
  }

  async fn on_update(&self, event: IncomingEvent) -> FastJobResult<()> {
    let message = ChatMessage::try_from(event.payload)
      .map_err(|_| FastJobErrorType::DeserializationFailed)?;
    let mut rooms = self.rooms.lock().await;
    let state = rooms
      .entry(event.room_id.clone())
      .or_insert_with(|| RoomState::new(event.room_id.clone()));
    if !state.messages.update_status(&message.id, message.status) {
      state.messages.insert(message.clone());
    }
    drop(rooms);
    self.bus.publish(&ChatBusEvent::Message(message));
    Ok(())
  }

  async fn on_ack(&self, event: IncomingEvent) -> FastJobResult<()> {
    let payload: AckPayload = serde_json::from_value(event.payload)
      .map_err(|_| FastJobErrorType::DeserializationFailed)?;
    self.ack.on_ack(&payload);
    if let Some(client_id) = payload.client_id {
      let mut rooms = self.rooms.lock().await;
      if let Some(state) = rooms.get_mut(&event.room_id) {
        state.messages.confirm(client_id, &payload.server_id);
      }
    }
    Ok(())
  }

  async fn on_read(&self, event: IncomingEvent) -> FastJobResult<()> {
    let payload: ReadPayload = serde_json::from_value(event.payload)
      .map_err(|_| FastJobErrorType::DeserializationFailed)?;
    let committed = lock(&self.read_receipts).set_last_read_at(
      &event.room_id,
      payload.reader_id,
      payload.last_read_at.as_deref(),
    );
    if !committed {
      return Ok(());
    }

    // A peer's read cursor marks our own sent messages as read. The receipt
    // guard must not be held across the rooms lock below.
    let is_peer = self.local_user() != Some(payload.reader_id);
    if is_peer {
      let at = lock(&self.read_receipts).get_last_read_at(&event.room_id, payload.reader_id);
      if let (Some(user_id), Some(at)) = (self.local_user(), at) {
        let mut rooms = self.rooms.lock().await;
        if let Some(state) = rooms.get_mut(&event.room_id) {
          state.messages.mark_read_up_to(user_id, at);
        }
      }
    }
    self.bus.publish(&ChatBusEvent::Read {
      room_id: event.room_id,
      payload,
    });
    Ok(())
  }

  fn on_typing(&self, event: IncomingEvent) -> FastJobResult<()> {
    let mut payload: TypingPayload = serde_json::from_value(event.payload)
      .map_err(|_| FastJobErrorType::DeserializationFailed)?;
    // Dedicated start/stop events carry the state in their name.
    match event.event {
      ChatEvent::TypingStart => payload.typing = true,
      ChatEvent::TypingStop => payload.typing = false,
      _ => {}
    }
    let changed = lock(&self.typing)
      .as_mut()
      .map(|t| t.on_event(&event.room_id, &payload))
      .unwrap_or(false);
    if changed {
      self.bus.publish(&ChatBusEvent::Typing {
        room_id: event.room_id,
        payload,
      });
    }
    Ok(())
  }

  fn on_presence_snapshot(&self, event: IncomingEvent) -> FastJobResult<()> {
    let items: Vec<PresenceSnapshotItem> = serde_json::from_value(event.payload)
      .map_err(|_| FastJobErrorType::DeserializationFailed)?;
    let mut presence = lock(&self.presence);
    presence.set_snapshot(items);
    presence.mark_subscribed();
    Ok(())
  }

  fn on_presence_diff(&self, event: IncomingEvent) -> FastJobResult<()> {
    let diff: PresenceDiffPayload = serde_json::from_value(event.payload)
      .map_err(|_| FastJobErrorType::DeserializationFailed)?;
    lock(&self.presence).apply_diff(diff);
    Ok(())
  }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::MessageStatus;
  use fastjob_utils::storage::MemoryStorage;
  use pretty_assertions::assert_eq;
  use serde_json::Value;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[derive(Default)]
  struct NullTransport;
  impl Transport for NullTransport {
    fn emit(&self, _event: &str, _payload: &Value) -> FastJobResult<bool> {
      Ok(true)
    }
  }

  fn session() -> ChatSession {
    ChatSession::new(Arc::new(NullTransport), Arc::new(MemoryStorage::new()))
  }

  fn room(id: &str) -> ChatRoomId {
    ChatRoomId(id.to_string())
  }

  fn wire_message(id: &str, room_id: &str, sender: i32, at: &str) -> Value {
    json!({
      "id": id,
      "roomId": room_id,
      "senderId": sender,
      "content": "hello",
      "status": "sent",
      "createdAt": at,
    })
  }

  #[tokio::test]
  async fn inbound_message_counts_unread_for_inactive_rooms() {
    let session = session();
    session.login(LocalUserId(1), None).await;
    session.enter_room(&room("active")).await;

    let event = IncomingEvent::new(
      ChatEvent::Message,
      room("other"),
      wire_message("m1", "other", 2, "2026-01-02T03:04:05Z"),
    );
    session.dispatch_inbound(event).await.unwrap();

    assert_eq!(session.unread_count(&room("other")), 1);
    assert_eq!(session.unread_total(), 1);
    assert_eq!(session.messages_snapshot(&room("other")).await.len(), 1);
  }

  #[tokio::test]
  async fn active_room_and_own_messages_do_not_count_unread() {
    let session = session();
    session.login(LocalUserId(1), None).await;
    session.enter_room(&room("r1")).await;

    // Peer message in the active room.
    session
      .dispatch_inbound(IncomingEvent::new(
        ChatEvent::Message,
        room("r1"),
        wire_message("m1", "r1", 2, "2026-01-02T03:04:05Z"),
      ))
      .await
      .unwrap();

    // Own message echoed into a background room.
    session
      .dispatch_inbound(IncomingEvent::new(
        ChatEvent::Message,
        room("r2"),
        wire_message("m2", "r2", 1, "2026-01-02T03:04:06Z"),
      ))
      .await
      .unwrap();

    assert_eq!(session.unread_total(), 0);
  }

  #[tokio::test]
  async fn entering_a_room_clears_its_unread() {
    let session = session();
    session.login(LocalUserId(1), None).await;
    session
      .dispatch_inbound(IncomingEvent::new(
        ChatEvent::Message,
        room("r1"),
        wire_message("m1", "r1", 2, "2026-01-02T03:04:05Z"),
      ))
      .await
      .unwrap();
    assert_eq!(session.unread_count(&room("r1")), 1);

    session.enter_room(&room("r1")).await;
    assert_eq!(session.unread_count(&room("r1")), 0);
    assert_eq!(session.unread_total(), 0);
  }

  #[tokio::test]
  async fn ack_confirms_the_optimistic_message() {
    let session = session();
    session.login(LocalUserId(1), None).await;
    session.enter_room(&room("r1")).await;
    let client_id = session.send_text(&room("r1"), "hi").await.unwrap();

    session
      .dispatch_inbound(IncomingEvent::new(
        ChatEvent::Ack,
        room("r1"),
        json!({
          "clientId": client_id,
          "serverId": "S1",
          "roomId": "r1",
          "senderId": 1,
        }),
      ))
      .await
      .unwrap();

    let messages = session.messages_snapshot(&room("r1")).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id.0, "S1");
    assert_eq!(messages[0].status, MessageStatus::Sent);
    assert!(session.ack().is_acked(client_id));
  }

  #[tokio::test]
  async fn acked_server_echo_is_not_inserted_twice() {
    let session = session();
    session.login(LocalUserId(1), None).await;
    session.enter_room(&room("r1")).await;
    let client_id = session.send_text(&room("r1"), "hi").await.unwrap();
    session
      .dispatch_inbound(IncomingEvent::new(
        ChatEvent::Ack,
        room("r1"),
        json!({
          "clientId": client_id,
          "serverId": "S1",
          "roomId": "r1",
          "senderId": 1,
        }),
      ))
      .await
      .unwrap();

    // The server later broadcasts the same message under its own id.
    session
      .dispatch_inbound(IncomingEvent::new(
        ChatEvent::Message,
        room("r1"),
        wire_message("S1", "r1", 1, "2026-01-02T03:04:05Z"),
      ))
      .await
      .unwrap();

    assert_eq!(session.messages_snapshot(&room("r1")).await.len(), 1);
  }

  #[tokio::test]
  async fn echo_arriving_before_the_ack_leaves_a_single_message() {
    let session = session();
    session.login(LocalUserId(1), None).await;
    session.enter_room(&room("r1")).await;
    let client_id = session.send_text(&room("r1"), "hi").await.unwrap();

    // The broadcast echo races ahead of the ack.
    session
      .dispatch_inbound(IncomingEvent::new(
        ChatEvent::Message,
        room("r1"),
        wire_message("SRV-9", "r1", 1, "2026-01-02T03:04:05Z"),
      ))
      .await
      .unwrap();
    session
      .dispatch_inbound(IncomingEvent::new(
        ChatEvent::Ack,
        room("r1"),
        json!({
          "clientId": client_id,
          "serverId": "SRV-9",
          "roomId": "r1",
          "senderId": 1,
        }),
      ))
      .await
      .unwrap();

    let messages = session.messages_snapshot(&room("r1")).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id.0, "SRV-9");
    assert_eq!(messages[0].status, MessageStatus::Sent);
  }

  #[tokio::test]
  async fn peer_read_receipt_marks_sent_messages_read() {
    let session = session();
    session.login(LocalUserId(1), None).await;
    session.enter_room(&room("r1")).await;

    session
      .dispatch_inbound(IncomingEvent::new(
        ChatEvent::Message,
        room("r1"),
        wire_message("m1", "r1", 1, "2026-01-02T03:00:00Z"),
      ))
      .await
      .unwrap();

    session
      .dispatch_inbound(IncomingEvent::new(
        ChatEvent::Read,
        room("r1"),
        json!({
          "readerId": 2,
          "lastReadMessageId": "m1",
          "lastReadAt": "2026-01-02T03:30:00Z",
        }),
      ))
      .await
      .unwrap();

    let messages = session.messages_snapshot(&room("r1")).await;
    assert_eq!(messages[0].status, MessageStatus::Read);
    assert!(session.last_read_at(&room("r1"), LocalUserId(2)).is_some());
  }

  #[tokio::test]
  async fn inbound_dispatch_can_be_spawned() {
    // Every dispatch path must yield a Send future; a sync guard held across
    // an await point would break this.
    let session = Arc::new(session());
    session.login(LocalUserId(1), None).await;
    session.enter_room(&room("r1")).await;
    let handle = {
      let session = session.clone();
      tokio::spawn(async move {
        session
          .dispatch_inbound(IncomingEvent::new(
            ChatEvent::Read,
            room("r1"),
            json!({
              "readerId": 2,
              "lastReadMessageId": null,
              "lastReadAt": "2100-01-01T00:00:00Z",
            }),
          ))
          .await
      })
    };
    handle.await.unwrap().unwrap();
    assert!(session.last_read_at(&room("r1"), LocalUserId(2)).is_some());
  }

  #[tokio::test]
  async fn typing_events_reach_the_bus_once() {
    let session = session();
    session.login(LocalUserId(1), None).await;
    let hits = Arc::new(AtomicUsize::new(0));
    {
      let hits = hits.clone();
      session.bus().subscribe(move |event| {
        if matches!(event, ChatBusEvent::Typing { .. }) {
          hits.fetch_add(1, Ordering::SeqCst);
        }
      });
    }

    let payload = json!({ "senderId": 2, "typing": true });
    session
      .dispatch_inbound(IncomingEvent::new(ChatEvent::TypingStart, room("r1"), payload.clone()))
      .await
      .unwrap();
    // Immediate duplicate is absorbed by the dedup window.
    session
      .dispatch_inbound(IncomingEvent::new(ChatEvent::TypingStart, room("r1"), payload))
      .await
      .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(session.is_partner_typing(&room("r1")));
  }

  #[tokio::test]
  async fn presence_flows_through_snapshot_and_diff() {
    let session = session();
    session.login(LocalUserId(1), None).await;
    assert_eq!(session.peer_online(LocalUserId(2)), None);

    session
      .dispatch_inbound(IncomingEvent::new(
        ChatEvent::PresenceSnapshot,
        room("r1"),
        json!([{ "userId": 2, "lastSeenAt": 1000 }]),
      ))
      .await
      .unwrap();
    assert_eq!(session.peer_online(LocalUserId(2)), Some(true));

    session
      .dispatch_inbound(IncomingEvent::new(
        ChatEvent::PresenceDiff,
        room("r1"),
        json!({ "upserts": [{ "userId": 2, "lastSeenAt": -2000 }] }),
      ))
      .await
      .unwrap();
    assert_eq!(session.peer_online(LocalUserId(2)), Some(false));
  }

  #[tokio::test]
  async fn reconnect_is_broadcast() {
    let session = session();
    let hits = Arc::new(AtomicUsize::new(0));
    {
      let hits = hits.clone();
      session.bus().subscribe(move |event| {
        if matches!(event, ChatBusEvent::Reconnected) {
          hits.fetch_add(1, Ordering::SeqCst);
        }
      });
    }
    session
      .dispatch_inbound(IncomingEvent::new(ChatEvent::Reconnected, room("r1"), json!({})))
      .await
      .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn send_requires_login() {
    let session = session();
    let err = session.send_text(&room("r1"), "hi").await.unwrap_err();
    assert_eq!(err.error_type, FastJobErrorType::NotLoggedIn);
  }

  struct FailingKeyExchange;

  #[async_trait]
  impl KeyExchange for FailingKeyExchange {
    async fn ensure_identity_key_pair(&self) -> FastJobResult<IdentityKeyPair> {
      Err(FastJobErrorType::GenerateKeyError.into())
    }
    async fn exchange_public_key(&self, _public_key_hex: &str) -> FastJobResult<()> {
      Ok(())
    }
    async fn ensure_shared_key_for_local_user(&self, _user_id: LocalUserId) -> FastJobResult<()> {
      Ok(())
    }
  }

  struct StaticKeyExchange;

  #[async_trait]
  impl KeyExchange for StaticKeyExchange {
    async fn ensure_identity_key_pair(&self) -> FastJobResult<IdentityKeyPair> {
      Ok(IdentityKeyPair {
        public_key_hex: "abcd".into(),
        private_key_hex: "ef01".into(),
      })
    }
    async fn exchange_public_key(&self, _public_key_hex: &str) -> FastJobResult<()> {
      Ok(())
    }
    async fn ensure_shared_key_for_local_user(&self, _user_id: LocalUserId) -> FastJobResult<()> {
      Ok(())
    }
  }

  #[tokio::test]
  async fn identity_key_is_cached_in_the_key_store() {
    use fastjob_utils::keys::{KeyRecord, MemoryKeyStore, SecureKeyStore};
    let key_store = Arc::new(MemoryKeyStore::new());
    let session = ChatSession::new(Arc::new(NullTransport), Arc::new(MemoryStorage::new()))
      .with_key_store(key_store.clone());
    session.login(LocalUserId(7), Some(&StaticKeyExchange)).await;
    assert_eq!(
      key_store.get_key("identity:7").unwrap(),
      Some(KeyRecord::Raw {
        material_hex: "ef01".into()
      })
    );
  }

  #[tokio::test]
  async fn failed_key_bootstrap_does_not_block_login() {
    let session = session();
    session.login(LocalUserId(1), Some(&FailingKeyExchange)).await;
    assert_eq!(session.local_user(), Some(LocalUserId(1)));
    session.enter_room(&room("r1")).await;
    assert!(session.send_text(&room("r1"), "hi").await.is_ok());
  }
}
