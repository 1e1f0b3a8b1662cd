//! Messages streamed to plan subscribers.

use serde::{Deserialize, Serialize};

use crate::errors::ApiError;
use crate::ids::ReplyId;

/// One message delivered to every subscriber of a session.
///
/// `Reply` chunks are coalesced in the session's output buffer; every other
/// variant is published immediately after the buffer is flushed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// A new reply started streaming.
    Start {
        /// Reply being streamed.
        #[serde(rename = "replyId")]
        reply_id: ReplyId,
    },
    /// Reply text.
    Reply {
        /// Text fragment (possibly several coalesced deltas).
        chunk: String,
    },
    /// The run failed; always the last message a subscriber sees.
    Error {
        /// Terminal error.
        error: ApiError,
    },
    /// The reply finished streaming.
    Finished,
    /// The run was stopped.
    Aborted,
}

impl StreamMessage {
    /// Stable type label.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Reply { .. } => "reply",
            Self::Error { .. } => "error",
            Self::Finished => "finished",
            Self::Aborted => "aborted",
        }
    }

    /// Whether this is an `Error` message.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Whether this message closes a reply or the run. Such messages are
    /// never dropped on a full subscriber channel.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Finished | Self::Aborted)
    }
}
