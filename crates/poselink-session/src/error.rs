use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::ChannelError;

/// Session-level failures.
///
/// Protocol errors arriving from the peer are converted into `ErrorPayload`
/// values and surfaced as session events; this enum covers the local API
/// surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session already opened")]
    AlreadyOpened,
    #[error("session is closed")]
    Closed,
    #[error("session is not connected yet")]
    NotConnected,
    #[error("connect notification already delivered")]
    ConnectAlreadyDelivered,
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Wire shape of the `session.error` payload and of request rejections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
