//! Model provider errors.

/// Errors from starting or consuming a model stream.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Connection-level failure.
    #[error("transport error: {message}")]
    Transport {
        /// Description.
        message: String,
    },

    /// The backend answered with a non-success status.
    #[error("provider returned status {status}: {message}")]
    Status {
        /// HTTP status.
        status: u16,
        /// Response body or summary.
        message: String,
    },

    /// Rate limited by the backend.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Description.
        message: String,
    },

    /// Credentials rejected.
    #[error("authentication failed: {message}")]
    Auth {
        /// Description.
        message: String,
    },

    /// Malformed stream data.
    #[error("invalid stream data: {message}")]
    InvalidResponse {
        /// Description.
        message: String,
    },

    /// The request's cancellation token fired.
    #[error("request cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::RateLimited { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Auth { .. } | Self::InvalidResponse { .. } | Self::Cancelled => false,
        }
    }

    /// Stable category label for logs and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Status { .. } => "status",
            Self::RateLimited { .. } => "rate_limited",
            Self::Auth { .. } => "auth",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(
            ProviderError::Transport {
                message: "reset".into()
            }
            .is_retryable()
        );
        assert!(
            ProviderError::Status {
                status: 503,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(
            ProviderError::Status {
                status: 429,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(
            !ProviderError::Status {
                status: 400,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(
            !ProviderError::Auth {
                message: "bad key".into()
            }
            .is_retryable()
        );
        assert!(!ProviderError::Cancelled.is_retryable());
    }

    #[test]
    fn display_is_descriptive() {
        let err = ProviderError::Status {
            status: 500,
            message: "oops".into(),
        };
        assert_eq!(err.to_string(), "provider returned status 500: oops");
        assert_eq!(err.category(), "status");
    }
}
