//! Client-visible terminal errors.
//!
//! An [`ApiError`] is the single structured value an iteration delivers on a
//! session's terminal channel. The supervisor persists its message as the
//! plan's error status and streams it to subscribers.

use serde::{Deserialize, Serialize};

/// HTTP-style status for internal failures.
pub const STATUS_INTERNAL: u16 = 500;
/// HTTP-style status for rejected requests.
pub const STATUS_FORBIDDEN: u16 = 403;
/// HTTP-style status for oversized requests.
pub const STATUS_TOO_LARGE: u16 = 413;
/// HTTP-style status for an upstream failure.
pub const STATUS_BAD_GATEWAY: u16 = 502;

/// Failure category of a plan iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    /// Activation race or a status write failing before any model call.
    Precondition,
    /// Token budget exceeded before any network call.
    ResourceLimit,
    /// A hook vetoed continuation.
    HookRejection,
    /// The model stream could not be started after retries.
    InvocationFailure,
    /// An error surfaced mid-stream.
    StreamRuntime,
    /// Anything else.
    Other,
}

impl ApiErrorKind {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Precondition => "precondition",
            Self::ResourceLimit => "resource_limit",
            Self::HookRejection => "hook_rejection",
            Self::InvocationFailure => "invocation_failure",
            Self::StreamRuntime => "stream_runtime",
            Self::Other => "other",
        }
    }
}

/// Structured terminal error for a plan run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{kind:?} ({status}): {message}")]
pub struct ApiError {
    /// Failure category.
    pub kind: ApiErrorKind,
    /// HTTP-style status code.
    pub status: u16,
    /// Human-readable message, persisted as the plan's error status.
    pub message: String,
}

impl ApiError {
    /// Build an error from its parts.
    pub fn new(kind: ApiErrorKind, status: u16, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }

    /// Internal error before the model was called.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Precondition, STATUS_INTERNAL, message)
    }

    /// Token budget exceeded.
    pub fn resource_limit(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::ResourceLimit, STATUS_TOO_LARGE, message)
    }

    /// Hook veto.
    pub fn hook_rejection(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::HookRejection, STATUS_FORBIDDEN, message)
    }

    /// Model stream failed to start.
    pub fn invocation(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::InvocationFailure, STATUS_BAD_GATEWAY, message)
    }

    /// Mid-stream failure.
    pub fn stream_runtime(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::StreamRuntime, STATUS_INTERNAL, message)
    }

    /// Uncategorized internal error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Other, STATUS_INTERNAL, message)
    }
}
