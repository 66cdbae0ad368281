//! Message history: per-room ordered store and backward pagination.

use crate::api::{ChatMessage, MessageStatus};
use crate::newtypes::{ChatRoomId, LocalUserId, MessageId, PaginationCursor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fastjob_utils::error::FastJobResult;
use std::collections::HashSet;
use std::sync::Mutex;
use uuid::Uuid;

pub const DEFAULT_PAGE_LIMIT: i64 = 30;

/// One page of history. Pages arrive newest-first; `prev` points further
/// into the past.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
  pub prev: Option<PaginationCursor>,
  pub next: Option<PaginationCursor>,
  pub items: Vec<ChatMessage>,
}

/// Backend-agnostic history fetch.
///
/// Termination relies on the server echoing a stable `prev` cursor with zero
/// new items at end-of-data; a server that returns a different cursor each
/// time with an empty page would paginate indefinitely, so that contract
/// should be pinned down with the backend rather than assumed.
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
  async fn fetch_page(
    &self,
    room_id: &ChatRoomId,
    cursor: Option<&PaginationCursor>,
    limit: i64,
  ) -> FastJobResult<HistoryPage>;
}

/// A room's message list: ascending `created_at`, deduplicated by id, merged
/// from optimistic local inserts and server pages.
#[derive(Debug, Default)]
pub struct MessageStore {
  messages: Vec<ChatMessage>,
  ids: HashSet<MessageId>,
}

impl MessageStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn messages(&self) -> &[ChatMessage] {
    &self.messages
  }

  pub fn len(&self) -> usize {
    self.messages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.messages.is_empty()
  }

  pub fn contains(&self, id: &MessageId) -> bool {
    self.ids.contains(id)
  }

  pub fn get(&self, id: &MessageId) -> Option<&ChatMessage> {
    self.messages.iter().find(|m| &m.id == id)
  }

  /// Insert keeping chronological order. Duplicate ids are dropped.
  pub fn insert(&mut self, message: ChatMessage) -> bool {
    if !self.ids.insert(message.id.clone()) {
      return false;
    }
    let at = self
      .messages
      .partition_point(|m| m.created_at <= message.created_at);
    self.messages.insert(at, message);
    true
  }

  pub fn update_status(&mut self, id: &MessageId, status: MessageStatus) -> bool {
    match self.messages.iter_mut().find(|m| &m.id == id) {
      Some(m) => {
        m.status = status;
        true
      }
      None => false,
    }
  }

  /// Re-identify an optimistic message once the server ack assigns its real
  /// id, and mark it sent. When the server's broadcast echo raced ahead of
  /// the ack the echo already sits in the list under the server id; the
  /// stale optimistic entry is dropped instead.
  pub fn confirm(&mut self, client_id: Uuid, server_id: &str) -> bool {
    let old_id = MessageId::from(client_id);
    let new_id = MessageId(server_id.to_string());
    if self.ids.contains(&new_id) {
      if self.ids.remove(&old_id) {
        self.messages.retain(|m| m.id != old_id);
        return true;
      }
      return false;
    }
    let Some(message) = self.messages.iter_mut().find(|m| m.id == old_id) else {
      return false;
    };
    message.id = new_id.clone();
    message.status = MessageStatus::Sent;
    self.ids.remove(&old_id);
    self.ids.insert(new_id);
    true
  }

  /// Mark the local user's sent messages up to a read cursor as read.
  pub fn mark_read_up_to(&mut self, sender_id: LocalUserId, at: DateTime<Utc>) -> usize {
    let mut marked = 0;
    for m in &mut self.messages {
      if m.created_at > at {
        break;
      }
      if m.sender_id == sender_id && m.status == MessageStatus::Sent {
        m.status = MessageStatus::Read;
        marked += 1;
      }
    }
    marked
  }

  pub fn clear(&mut self) {
    self.messages.clear();
    self.ids.clear();
  }
}

#[derive(Debug, Clone, Default)]
struct PagerState {
  /// Cursor to fetch next; `None` means "most recent page".
  cursor: Option<PaginationCursor>,
  fetching: bool,
  has_more: bool,
}

/// Cursor-based backward pager over a room's history.
///
/// Concurrent `fetch_history` calls are serialized by the `fetching` guard —
/// an invocation while one is in flight is a no-op, so pages are always
/// applied in pagination order.
#[derive(Debug)]
pub struct HistoryPager {
  room_id: ChatRoomId,
  limit: i64,
  state: Mutex<PagerState>,
}

impl HistoryPager {
  pub fn new(room_id: ChatRoomId) -> Self {
    Self::with_limit(room_id, DEFAULT_PAGE_LIMIT)
  }

  pub fn with_limit(room_id: ChatRoomId, limit: i64) -> Self {
    Self {
      room_id,
      limit,
      state: Mutex::new(PagerState {
        cursor: None,
        fetching: false,
        has_more: true,
      }),
    }
  }

  pub fn has_more(&self) -> bool {
    self.lock().has_more
  }

  pub fn is_fetching(&self) -> bool {
    self.lock().fetching
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, PagerState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Fetch one page backward and merge it into the store. Returns the number
  /// of messages actually inserted. No-op when exhausted or already in
  /// flight.
  pub async fn fetch_history(
    &self,
    fetcher: &dyn HistoryFetcher,
    store: &mut MessageStore,
  ) -> FastJobResult<usize> {
    let used_cursor = {
      let mut state = self.lock();
      if state.fetching || !state.has_more {
        return Ok(0);
      }
      state.fetching = true;
      state.cursor.clone()
    };

    let result = fetcher
      .fetch_page(&self.room_id, used_cursor.as_ref(), self.limit)
      .await;

    let mut state = self.lock();
    state.fetching = false;
    let page = result?;

    // Pages arrive newest-first; store them oldest-first.
    let mut inserted = 0;
    for message in page.items.into_iter().rev() {
      if store.insert(message) {
        inserted += 1;
      }
    }

    let same_cursor = page.prev == used_cursor;
    if same_cursor && inserted == 0 {
      // A stable repeated cursor with no new data signals end-of-history.
      state.has_more = false;
    } else if !same_cursor {
      state.cursor = page.prev;
    }
    tracing::debug!(
      room = %self.room_id,
      inserted,
      has_more = state.has_more,
      "merged history page"
    );
    Ok(inserted)
  }

  /// Clear cursor/fetching/exhaustion state; called on room switch.
  pub fn reset(&self) {
    let mut state = self.lock();
    *state = PagerState {
      cursor: None,
      fetching: false,
      has_more: true,
    };
  }
}
