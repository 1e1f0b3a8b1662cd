//! Runtime error types.

use std::time::Duration;

/// Synchronous failures of the orchestrator's public operations.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The request is missing a required field.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A run is already active for the plan branch.
    #[error("plan {plan_id} is already active on branch {branch}")]
    AlreadyActive {
        /// Plan identifier.
        plan_id: String,
        /// Branch name.
        branch: String,
    },

    /// The active-session limit is reached.
    #[error("server busy: {current} active plans (max {max})")]
    ServerBusy {
        /// Sessions currently active.
        current: usize,
        /// Configured limit.
        max: usize,
    },
}

/// Failure reported by an external collaborator.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    /// The operation failed.
    #[error("{0}")]
    Failed(String),

    /// The operation did not finish within its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The addressed record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl CollaboratorError {
    /// Shorthand for [`CollaboratorError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
