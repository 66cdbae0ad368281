//! Outbound transport adapter.
//!
//! The concrete connection (raw socket, channel-based client, in-process
//! bridge) is an external collaborator. A `Transport` implements whichever
//! capabilities its protocol supports; `ws_send` walks them in priority
//! order and reports whether any outbound path accepted the frame.

use crate::api::ChatEvent;
use crate::newtypes::ChatRoomId;
use fastjob_utils::error::FastJobResult;
use serde_json::{json, Value};

/// Capability result: `Ok(true)` frame handed off, `Ok(false)` capability not
/// supported by this transport, `Err` the capability exists but sending failed.
pub trait Transport: Send + Sync {
  fn push(&self, event: &str, payload: &Value) -> FastJobResult<bool> {
    let _ = (event, payload);
    Ok(false)
  }

  fn emit(&self, event: &str, payload: &Value) -> FastJobResult<bool> {
    let _ = (event, payload);
    Ok(false)
  }

  fn send_text(&self, frame: &str) -> FastJobResult<bool> {
    let _ = frame;
    Ok(false)
  }

  fn post_message(&self, frame: &Value) -> FastJobResult<bool> {
    let _ = frame;
    Ok(false)
  }

  fn send_message(&self, event: &str, payload: &Value) -> FastJobResult<bool> {
    let _ = (event, payload);
    Ok(false)
  }
}

/// Build the wire frame for a room-scoped event.
pub fn encode_frame(event: &ChatEvent, room_id: &ChatRoomId, payload: &Value) -> Value {
  json!({
    "event": event.as_str(),
    "topic": format!("room:{}", room_id),
    "roomId": room_id,
    "payload": payload,
  })
}

/// Try each outbound capability in priority order. A capability error is
/// logged and the next one is tried; returns whether any path succeeded.
pub fn ws_send(
  transport: &dyn Transport,
  event: &ChatEvent,
  room_id: &ChatRoomId,
  payload: &Value,
) -> bool {
  let frame = encode_frame(event, room_id, payload);
  let name = event.as_str();

  // Capabilities are probed lazily so a handled frame goes out exactly once.
  let attempt = |capability: &str, result: FastJobResult<bool>| match result {
    Ok(handled) => handled,
    Err(e) => {
      tracing::warn!(capability, event = name, "transport capability failed: {e}");
      false
    }
  };

  if attempt("push", transport.push(name, &frame)) {
    return true;
  }
  if attempt("emit", transport.emit(name, &frame)) {
    return true;
  }
  if let Some(text) = frame_text(&frame) {
    if attempt("send_text", transport.send_text(&text)) {
      return true;
    }
  }
  if attempt("post_message", transport.post_message(&frame)) {
    return true;
  }
  if attempt("send_message", transport.send_message(name, payload)) {
    return true;
  }

  tracing::warn!(event = name, room = %room_id, "no outbound transport capability accepted the frame");
  false
}

fn frame_text(frame: &Value) -> Option<String> {
  serde_json::to_string(frame).ok()
}
