//! Outgoing message pipeline and workflow flow actions.
//!
//! UI-visible optimism is separated from confirmed delivery: the local
//! preview event always fires synchronously before any network I/O, and
//! confirmation arrives later through the ack matcher. The returned client
//! id is not server-confirmed.

use crate::ack::AckMatcher;
use crate::api::{AttachmentRef, ChatEvent, ChatMessage, MessageStatus, StructuredContent};
use crate::bus::{ChatBusEvent, EventBus};
use crate::history::MessageStore;
use crate::newtypes::{ChatRoomId, LocalUserId, MessageId, PostId};
use crate::transport::{ws_send, Transport};
use chrono::Utc;
use fastjob_utils::error::{FastJobErrorType, FastJobResult};
use fastjob_workflow::{WorkflowStatus, WorkflowStepper};
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// User-visible announcement channel; the concrete surface (toast, banner)
/// is an external collaborator.
pub trait Notifier: Send + Sync {
  fn announce(&self, level: NoticeLevel, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
  Info,
  Warning,
  Error,
}

/// Default notifier that only logs.
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn announce(&self, level: NoticeLevel, message: &str) {
    match level {
      NoticeLevel::Info => tracing::info!("{message}"),
      NoticeLevel::Warning => tracing::warn!("{message}"),
      NoticeLevel::Error => tracing::error!("{message}"),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
  pub attachment: Option<AttachmentRef>,
  pub secure: bool,
}

impl SendOptions {
  pub fn secure() -> Self {
    Self {
      attachment: None,
      secure: true,
    }
  }
}

#[derive(Clone)]
pub struct MessageSender {
  transport: Arc<dyn Transport>,
  bus: Arc<EventBus>,
  ack: Arc<AckMatcher>,
}

impl MessageSender {
  pub fn new(transport: Arc<dyn Transport>, bus: Arc<EventBus>, ack: Arc<AckMatcher>) -> Self {
    Self { transport, bus, ack }
  }

  pub fn ack(&self) -> &AckMatcher {
    &self.ack
  }

  /// Serialize a workflow signal (optionally merging a file attachment
  /// reference) and send it. Returns the client id for ack correlation.
  pub fn send_structured(
    &self,
    messages: &mut MessageStore,
    room_id: &ChatRoomId,
    payload: &StructuredContent,
    sender_id: LocalUserId,
    opts: &SendOptions,
  ) -> FastJobResult<Uuid> {
    let content = encode_content(payload, opts.attachment.as_ref())?;
    self.send_content(messages, room_id, content, sender_id, opts.secure)
  }

  /// Plain-text send through the same optimistic pipeline.
  pub fn send_text(
    &self,
    messages: &mut MessageStore,
    room_id: &ChatRoomId,
    content: &str,
    sender_id: LocalUserId,
    opts: &SendOptions,
  ) -> FastJobResult<Uuid> {
    self.send_content(messages, room_id, content.to_string(), sender_id, opts.secure)
  }

  fn send_content(
    &self,
    messages: &mut MessageStore,
    room_id: &ChatRoomId,
    content: String,
    sender_id: LocalUserId,
    secure: bool,
  ) -> FastJobResult<Uuid> {
    let client_id = Uuid::new_v4();
    let message = ChatMessage {
      id: MessageId::from(client_id),
      room_id: room_id.clone(),
      sender_id,
      content: content.clone(),
      status: MessageStatus::Sending,
      created_at: Utc::now(),
    };

    // Optimistic preview before any network I/O.
    messages.insert(message.clone());
    self.ack.track_pending(client_id);
    self.bus.publish(&ChatBusEvent::Message(message));

    let wire = json!({
      "senderId": sender_id,
      "message": content,
      "secure": secure,
      "id": client_id,
    });
    if !ws_send(self.transport.as_ref(), &ChatEvent::Message, room_id, &wire) {
      messages.update_status(&MessageId::from(client_id), MessageStatus::Failed);
      return Err(FastJobErrorType::CouldntSendMessage.into());
    }
    Ok(client_id)
  }

  /// Manual, UI-triggered retry of an unconfirmed or failed message under
  /// its original client id.
  pub fn retry_message(
    &self,
    messages: &mut MessageStore,
    room_id: &ChatRoomId,
    client_id: Uuid,
  ) -> FastJobResult<()> {
    let id = MessageId::from(client_id);
    let Some(message) = messages.get(&id).cloned() else {
      return Err(FastJobErrorType::NotFound.into());
    };
    messages.update_status(&id, MessageStatus::Retrying);
    self.ack.track_pending(client_id);

    let wire = json!({
      "senderId": message.sender_id,
      "message": message.content,
      "secure": true,
      "id": client_id,
    });
    if !ws_send(self.transport.as_ref(), &ChatEvent::Message, room_id, &wire) {
      messages.update_status(&id, MessageStatus::Failed);
      return Err(FastJobErrorType::CouldntSendMessage.into());
    }
    Ok(())
  }
}

fn encode_content(
  payload: &StructuredContent,
  attachment: Option<&AttachmentRef>,
) -> FastJobResult<String> {
  let mut value =
    serde_json::to_value(payload).map_err(|_| FastJobErrorType::SerializationFailed)?;
  if let Some(att) = attachment {
    let att_value =
      serde_json::to_value(att).map_err(|_| FastJobErrorType::SerializationFailed)?;
    if let Some(obj) = value.as_object_mut() {
      obj.insert("attachment".to_string(), att_value);
    }
  }
  serde_json::to_string(&value).map_err(|_| FastJobErrorType::SerializationFailed.into())
}

/// Optional API call run before a flow action's message goes out; a failure
/// aborts the action without advancing workflow state.
pub type ApiCall<'a> = Pin<Box<dyn Future<Output = FastJobResult<()>> + Send + 'a>>;

/// Workflow actions for one chat room: each optionally invokes an API call,
/// sends the structured signal through the transport, emits the local
/// preview, and advances the workflow store on success.
pub struct FlowActions {
  sender: MessageSender,
  workflow: Arc<Mutex<WorkflowStepper>>,
  notifier: Arc<dyn Notifier>,
  room_id: ChatRoomId,
  post_id: Option<PostId>,
  local_user: LocalUserId,
}

impl FlowActions {
  pub fn new(
    sender: MessageSender,
    workflow: Arc<Mutex<WorkflowStepper>>,
    notifier: Arc<dyn Notifier>,
    room_id: ChatRoomId,
    post_id: Option<PostId>,
    local_user: LocalUserId,
  ) -> Self {
    Self {
      sender,
      workflow,
      notifier,
      room_id,
      post_id,
      local_user,
    }
  }

  pub fn workflow(&self) -> Arc<Mutex<WorkflowStepper>> {
    self.workflow.clone()
  }

  /// Quotation requires the room to be linked to a post.
  pub async fn on_propose_quote(
    &self,
    messages: &mut MessageStore,
    api: Option<ApiCall<'_>>,
  ) -> FastJobResult<Uuid> {
    if self.post_id.is_none() {
      self
        .notifier
        .announce(NoticeLevel::Error, "this room is not linked to a job post");
      tracing::warn!(room = %self.room_id, "propose quote without post link");
      return Err(FastJobErrorType::RoomNotLinkedToPost.into());
    }
    self
      .run(
        messages,
        api,
        StructuredContent::QuoteProposed,
        WorkflowStatus::QuotationPendingReview,
      )
      .await
  }

  pub async fn on_approve_quotation(
    &self,
    messages: &mut MessageStore,
    api: Option<ApiCall<'_>>,
  ) -> FastJobResult<Uuid> {
    self
      .run(
        messages,
        api,
        StructuredContent::ApproveOrder,
        WorkflowStatus::OrderApproved,
      )
      .await
  }

  pub async fn on_start_work(
    &self,
    messages: &mut MessageStore,
    api: Option<ApiCall<'_>>,
  ) -> FastJobResult<Uuid> {
    self
      .run(
        messages,
        api,
        StructuredContent::StartWork,
        WorkflowStatus::InProgress,
      )
      .await
  }

  pub async fn on_submit_delivery(
    &self,
    messages: &mut MessageStore,
    api: Option<ApiCall<'_>>,
  ) -> FastJobResult<Uuid> {
    self
      .run(
        messages,
        api,
        StructuredContent::SubmitDelivery,
        WorkflowStatus::PendingEmployerReview,
      )
      .await
  }

  pub async fn on_request_revision(
    &self,
    messages: &mut MessageStore,
    api: Option<ApiCall<'_>>,
  ) -> FastJobResult<Uuid> {
    self
      .run(
        messages,
        api,
        StructuredContent::RequestRevision,
        WorkflowStatus::InProgress,
      )
      .await
  }

  pub async fn on_release_payment(
    &self,
    messages: &mut MessageStore,
    api: Option<ApiCall<'_>>,
  ) -> FastJobResult<Uuid> {
    self
      .run(
        messages,
        api,
        StructuredContent::ReleasePayment,
        WorkflowStatus::Completed,
      )
      .await
  }

  pub async fn on_cancel(
    &self,
    messages: &mut MessageStore,
    api: Option<ApiCall<'_>>,
  ) -> FastJobResult<Uuid> {
    self
      .run(
        messages,
        api,
        StructuredContent::Cancel,
        WorkflowStatus::Cancelled,
      )
      .await
  }

  async fn run(
    &self,
    messages: &mut MessageStore,
    api: Option<ApiCall<'_>>,
    signal: StructuredContent,
    target: WorkflowStatus,
  ) -> FastJobResult<Uuid> {
    if let Some(call) = api {
      if let Err(e) = call.await {
        self
          .notifier
          .announce(NoticeLevel::Error, "the request failed, nothing was changed");
        tracing::warn!(room = %self.room_id, ?signal, "flow action api call failed: {e}");
        return Err(e);
      }
    }

    let client_id = self.sender.send_structured(
      messages,
      &self.room_id,
      &signal,
      self.local_user,
      &SendOptions::secure(),
    )?;

    self.go_to_status(target, None);
    Ok(client_id)
  }

  /// Idempotent direct state assignment. The web client carried a step-walk
  /// fallback for stores without a direct-set pathway; the store here cannot
  /// fail that call, so the direct path is authoritative.
  pub fn go_to_status(&self, target: WorkflowStatus, prev: Option<WorkflowStatus>) {
    let mut stepper = self.workflow.lock().unwrap_or_else(|e| e.into_inner());
    let current = stepper.status();
    if current == target {
      return;
    }
    let status_before_cancel = if target == WorkflowStatus::Cancelled {
      prev.or(Some(current))
    } else {
      None
    };
    stepper.store_mut().set_state(target, status_before_cancel);
  }
}
