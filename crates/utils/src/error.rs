use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use strum::{Display, EnumIter};

#[derive(Display, Debug, Serialize, Deserialize, Clone, PartialEq, Eq, EnumIter, Hash)]
#[serde(tag = "error", content = "message", rename_all = "camelCase")]
#[non_exhaustive]
pub enum FastJobErrorType {
  NotLoggedIn,
  NotFound,
  InvalidRoomId,
  RoomNotLinkedToPost,
  CouldntSendMessage,
  CouldntFetchHistory,
  CouldntSaveLastRead,
  CouldntUpdateChatUnread,
  WorkflowDoesNotExist,
  InvalidWorkflowAction(String),
  BillingAlreadyFinalized,
  CouldntCreatePendingSenderAck,
  TransportUnavailable,
  InvalidBodyField,
  InvalidDateFormat,
  SerializationFailed,
  DeserializationFailed,
  StorageReadFailed,
  StorageWriteFailed,
  EncryptingError,
  DecryptingError,
  GenerateKeyError,
  KeyNotFound,
  ExternalApiError,
  InvalidField(String),
  Unknown(String),
}

use std::{backtrace::Backtrace, fmt};

pub type FastJobResult<T> = Result<T, FastJobError>;

pub struct FastJobError {
  pub error_type: FastJobErrorType,
  pub inner: anyhow::Error,
  pub context: Backtrace,
}

impl<T> From<T> for FastJobError
where
  T: Into<anyhow::Error>,
{
  fn from(t: T) -> Self {
    let cause = t.into();
    FastJobError {
      error_type: FastJobErrorType::Unknown(format!("{}", &cause)),
      inner: cause,
      context: Backtrace::capture(),
    }
  }
}

impl Debug for FastJobError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FastJobError")
      .field("message", &self.error_type)
      .field("inner", &self.inner)
      .field("context", &self.context)
      .finish()
  }
}

impl fmt::Display for FastJobError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}: ", &self.error_type)?;
    writeln!(f, "{}", self.inner)?;
    fmt::Display::fmt(&self.context, f)
  }
}

impl From<FastJobErrorType> for FastJobError {
  fn from(error_type: FastJobErrorType) -> Self {
    let inner = anyhow::anyhow!("{}", error_type);
    FastJobError {
      error_type,
      inner,
      context: Backtrace::capture(),
    }
  }
}

pub trait FastJobErrorExt<T, E: Into<anyhow::Error>> {
  fn with_fastjob_type(self, error_type: FastJobErrorType) -> FastJobResult<T>;
}

impl<T, E: Into<anyhow::Error>> FastJobErrorExt<T, E> for Result<T, E> {
  fn with_fastjob_type(self, error_type: FastJobErrorType) -> FastJobResult<T> {
    self.map_err(|error| FastJobError {
      error_type,
      inner: error.into(),
      context: Backtrace::capture(),
    })
  }
}

pub trait FastJobErrorExt2<T> {
  fn with_fastjob_type(self, error_type: FastJobErrorType) -> FastJobResult<T>;
  fn into_anyhow(self) -> Result<T, anyhow::Error>;
}

impl<T> FastJobErrorExt2<T> for FastJobResult<T> {
  fn with_fastjob_type(self, error_type: FastJobErrorType) -> FastJobResult<T> {
    self.map_err(|mut e| {
      e.error_type = error_type;
      e
    })
  }
  // this function can't be an impl From or similar because it would conflict with one of the
  // other broad Into<> implementations
  fn into_anyhow(self) -> Result<T, anyhow::Error> {
    self.map_err(|e| e.inner)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn serializes_no_message() -> FastJobResult<()> {
    let json = serde_json::to_string(&FastJobErrorType::NotLoggedIn)?;
    assert_eq!(&json, "{\"error\":\"notLoggedIn\"}");
    Ok(())
  }

  #[test]
  fn serializes_with_message() -> FastJobResult<()> {
    let err = FastJobErrorType::InvalidField(String::from("reason"));
    let json = serde_json::to_string(&err)?;
    assert_eq!(&json, "{\"error\":\"invalidField\",\"message\":\"reason\"}");
    Ok(())
  }

  #[test]
  fn converts_foreign_errors() {
    let parse_err = "nope".parse::<i32>().unwrap_err();
    let err = FastJobError::from(parse_err);
    assert!(matches!(err.error_type, FastJobErrorType::Unknown { .. }));
  }

  #[test]
  fn with_fastjob_type_overrides() {
    let res: Result<(), std::num::ParseIntError> = "x".parse::<i32>().map(|_| ());
    let err = res
      .with_fastjob_type(FastJobErrorType::InvalidDateFormat)
      .unwrap_err();
    assert_eq!(err.error_type, FastJobErrorType::InvalidDateFormat);
  }
}
