//! End-to-end session scenario: optimistic send, server acknowledgment,
//! duplicate echo suppression, peer read receipt, and history backfill.

use async_trait::async_trait;
use fastjob_chat::api::{ChatEvent, ChatMessage, IncomingEvent, MessageStatus};
use fastjob_chat::history::{HistoryFetcher, HistoryPage};
use fastjob_chat::newtypes::{ChatRoomId, LocalUserId, MessageId, PaginationCursor};
use fastjob_chat::session::ChatSession;
use fastjob_chat::transport::Transport;
use fastjob_utils::error::FastJobResult;
use fastjob_utils::storage::MemoryStorage;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CapturingTransport {
  frames: Mutex<Vec<Value>>,
}

impl Transport for CapturingTransport {
  fn emit(&self, _event: &str, payload: &Value) -> FastJobResult<bool> {
    self.frames.lock().unwrap().push(payload.clone());
    Ok(true)
  }
}

struct OnePageFetcher;

#[async_trait]
impl HistoryFetcher for OnePageFetcher {
  async fn fetch_page(
    &self,
    room_id: &ChatRoomId,
    cursor: Option<&PaginationCursor>,
    _limit: i64,
  ) -> FastJobResult<HistoryPage> {
    if cursor.is_some() {
      // End of history: stable cursor, nothing new.
      return Ok(HistoryPage {
        prev: Some(PaginationCursor("P1".into())),
        next: None,
        items: vec![],
      });
    }
    Ok(HistoryPage {
      prev: Some(PaginationCursor("P1".into())),
      next: None,
      items: vec![ChatMessage {
        id: MessageId("H1".into()),
        room_id: room_id.clone(),
        sender_id: LocalUserId(2),
        content: "older message".into(),
        status: MessageStatus::Sent,
        created_at: chrono::DateTime::from_timestamp(100, 0).unwrap(),
      }],
    })
  }
}

#[tokio::test]
async fn optimistic_send_is_confirmed_and_read() {
  let transport = Arc::new(CapturingTransport::default());
  let session = ChatSession::new(transport.clone(), Arc::new(MemoryStorage::new()));
  let room = ChatRoomId("room-1".into());

  session.login(LocalUserId(1), None).await;
  session.enter_room(&room).await;

  // Backfill one page of history, then hit the end.
  assert_eq!(session.fetch_older(&room, &OnePageFetcher).await.unwrap(), 1);
  assert_eq!(session.fetch_older(&room, &OnePageFetcher).await.unwrap(), 0);

  let client_id = session.send_text(&room, "hello there").await.unwrap();
  {
    let frames = transport.frames.lock().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["event"], "chat:message");
    assert_eq!(frames[0]["topic"], "room:room-1");
  }

  let messages = session.messages_snapshot(&room).await;
  assert_eq!(messages.len(), 2);
  assert_eq!(messages[1].status, MessageStatus::Sending);

  // Server acknowledges under its own id.
  session
    .dispatch_inbound(IncomingEvent::new(
      ChatEvent::Ack,
      room.clone(),
      json!({
        "clientId": client_id,
        "serverId": "SRV-9",
        "roomId": "room-1",
        "senderId": 1,
      }),
    ))
    .await
    .unwrap();

  // The broadcast echo of the same message must not duplicate it.
  session
    .dispatch_inbound(IncomingEvent::new(
      ChatEvent::Message,
      room.clone(),
      json!({
        "id": "SRV-9",
        "roomId": "room-1",
        "senderId": 1,
        "content": "hello there",
        "status": "sent",
        "createdAt": "2026-01-02T03:04:05Z",
      }),
    ))
    .await
    .unwrap();

  let messages = session.messages_snapshot(&room).await;
  assert_eq!(messages.len(), 2);
  assert_eq!(messages[1].id, MessageId("SRV-9".into()));
  assert_eq!(messages[1].status, MessageStatus::Sent);
  assert_eq!(session.unread_total(), 0);

  // The peer reads the room; our sent message flips to read.
  session
    .dispatch_inbound(IncomingEvent::new(
      ChatEvent::Read,
      room.clone(),
      json!({
        "readerId": 2,
        "lastReadMessageId": "SRV-9",
        "lastReadAt": "2100-01-01T00:00:00Z",
      }),
    ))
    .await
    .unwrap();

  let messages = session.messages_snapshot(&room).await;
  assert_eq!(messages[1].status, MessageStatus::Read);
}
